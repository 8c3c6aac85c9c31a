//! Pipeline assembly and deployment settings.
//!
//! A pipeline is a fixed stage table wired to a set of collaborators.
//! [`PipelineBuilder::build`] validates the wiring before any run starts:
//! every collaborator must be present and the fan-out branches must declare
//! disjoint output keys.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::{BranchProducer, ConfigStore, ContentGenerator, Publisher, ResearchProvider};
use crate::domain::Stage;
use crate::errors::PipelineBuildError;

use super::compliance::ComplianceGate;
use super::metrics::MetricsRecorder;
use super::orchestrator::PipelineOrchestrator;
use super::retry::RetryPolicy;
use super::review::HumanReviewGateway;

/// Keys branch producers may not claim
pub const RESERVED_KEYS: [&str; 5] = ["configs", "research", "draft", "report", "receipt"];

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Development,
}

impl Environment {
    /// Only non-production deployments honor `skip_compliance`
    pub fn allows_compliance_bypass(&self) -> bool {
        !matches!(self, Self::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" | "stage" => Ok(Self::Staging),
            "development" | "dev" | "local" => Ok(Self::Development),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// How the run behaves when the gate escalates to human review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    /// Wait in-process for the ticket to be resolved
    Synchronous,
    /// Checkpoint the run and end it in `AwaitingReview`
    #[default]
    Asynchronous,
}

/// Run-independent pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub review_mode: ReviewMode,

    /// Synchronous review wait limit; unset waits indefinitely
    #[serde(default)]
    pub review_timeout_seconds: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            review_mode: ReviewMode::Asynchronous,
            review_timeout_seconds: None,
        }
    }
}

impl PipelineSettings {
    pub fn review_timeout(&self) -> Option<Duration> {
        self.review_timeout_seconds.map(Duration::from_secs)
    }
}

/// Fallback retry policy for a stage when its chain sets no `retries.*`
pub fn default_retry_policy(stage: Stage) -> RetryPolicy {
    match stage {
        Stage::Content => RetryPolicy::new(3, 1000),
        Stage::Media => RetryPolicy::new(3, 500),
        Stage::Publish => RetryPolicy::new(5, 1000),
        _ => RetryPolicy::new(3, 400),
    }
}

/// Fallback timeout for a stage when its chain sets no `timeout_ms`
pub fn default_timeout(stage: Stage) -> Option<Duration> {
    let ms = match stage {
        Stage::Config => 30_000,
        Stage::Research | Stage::Seo => 120_000,
        Stage::Media => 180_000,
        Stage::Content => 600_000,
        Stage::Comply => 60_000,
        Stage::Merge => 5_000,
        Stage::Publish | Stage::HumanReview | Stage::Metrics => return None,
    };
    Some(Duration::from_millis(ms))
}

/// External collaborators of a pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub config_store: Arc<dyn ConfigStore>,
    pub research: Arc<dyn ResearchProvider>,
    pub content: Arc<dyn ContentGenerator>,
    pub seo: Arc<dyn BranchProducer>,
    pub media: Arc<dyn BranchProducer>,
    pub publisher: Arc<dyn Publisher>,
}

/// Check that fan-out branches write disjoint, non-reserved keys
pub fn validate_branches(branches: &[&dyn BranchProducer]) -> Result<(), PipelineBuildError> {
    let mut owners: HashMap<String, String> = HashMap::new();

    for branch in branches {
        let keys = branch.output_keys();
        if keys.is_empty() {
            return Err(PipelineBuildError::EmptyBranch(branch.name().to_string()));
        }

        for key in keys {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(PipelineBuildError::ReservedKey {
                    branch: branch.name().to_string(),
                    key,
                });
            }
            if let Some(first) = owners.get(&key) {
                return Err(PipelineBuildError::KeyCollision {
                    key,
                    first: first.clone(),
                    second: branch.name().to_string(),
                });
            }
            owners.insert(key, branch.name().to_string());
        }
    }

    Ok(())
}

/// Assembles a [`PipelineOrchestrator`]
#[derive(Default)]
pub struct PipelineBuilder {
    config_store: Option<Arc<dyn ConfigStore>>,
    research: Option<Arc<dyn ResearchProvider>>,
    content: Option<Arc<dyn ContentGenerator>>,
    seo: Option<Arc<dyn BranchProducer>>,
    media: Option<Arc<dyn BranchProducer>>,
    publisher: Option<Arc<dyn Publisher>>,
    gate: Option<ComplianceGate>,
    review: Option<HumanReviewGateway>,
    metrics: Option<MetricsRecorder>,
    settings: PipelineSettings,
    runs_dir: Option<PathBuf>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn research(mut self, provider: Arc<dyn ResearchProvider>) -> Self {
        self.research = Some(provider);
        self
    }

    pub fn content(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.content = Some(generator);
        self
    }

    pub fn seo(mut self, producer: Arc<dyn BranchProducer>) -> Self {
        self.seo = Some(producer);
        self
    }

    pub fn media(mut self, producer: Arc<dyn BranchProducer>) -> Self {
        self.media = Some(producer);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn compliance_gate(mut self, gate: ComplianceGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn review_gateway(mut self, gateway: HumanReviewGateway) -> Self {
        self.review = Some(gateway);
        self
    }

    pub fn metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Directory holding per-run event logs
    pub fn runs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(dir.into());
        self
    }

    /// Validate the wiring and produce the orchestrator
    pub fn build(self) -> Result<PipelineOrchestrator, PipelineBuildError> {
        use PipelineBuildError::MissingCollaborator as Missing;

        let collaborators = Collaborators {
            config_store: self.config_store.ok_or(Missing("config store"))?,
            research: self.research.ok_or(Missing("research provider"))?,
            content: self.content.ok_or(Missing("content generator"))?,
            seo: self.seo.ok_or(Missing("seo producer"))?,
            media: self.media.ok_or(Missing("media producer"))?,
            publisher: self.publisher.ok_or(Missing("publisher"))?,
        };

        validate_branches(&[collaborators.seo.as_ref(), collaborators.media.as_ref()])?;

        Ok(PipelineOrchestrator::from_parts(
            collaborators,
            self.gate.unwrap_or_default(),
            self.review.ok_or(Missing("review gateway"))?,
            self.metrics.ok_or(Missing("metrics recorder"))?,
            self.settings,
            self.runs_dir.ok_or(Missing("runs directory"))?,
        ))
    }
}
