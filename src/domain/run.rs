//! Run requests, run state and reconstruction from events.
//!
//! A PipelineRun represents a single execution of the pipeline for one
//! (tenant, item, locale).

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::EffectiveConfig;
use crate::errors::PipelineError;

use super::content::PublishReceipt;
use super::events::{Event, EventType, Stage, StageStatus};
use super::report::ComplianceReport;
use super::state::{PipelineState, StateDelta};

/// A request to produce and publish one review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub tenant_id: String,
    pub item_id: String,
    pub locale: String,
    #[serde(default)]
    pub skip_compliance: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl RunRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        item_id: impl Into<String>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            item_id: item_id.into(),
            locale: locale.into(),
            skip_compliance: false,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_skip_compliance(mut self, skip: bool) -> Self {
        self.skip_compliance = skip;
        self
    }

    /// Reject malformed identifiers before any stage runs
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_identifier("tenant_id", &self.tenant_id)?;
        validate_identifier("item_id", &self.item_id)?;

        if !is_valid_locale(&self.locale) {
            return Err(PipelineError::InvalidRequest(format!(
                "locale '{}' is not a language tag like 'en' or 'en-GB'",
                self.locale
            )));
        }

        Ok(())
    }
}

/// Identifiers become path segments in the config and research stores.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::InvalidRequest(format!("{} is empty", field)));
    }
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !allowed || value.starts_with('.') {
        return Err(PipelineError::InvalidRequest(format!(
            "{} '{}' contains unsupported characters",
            field, value
        )));
    }
    Ok(())
}

fn is_valid_locale(locale: &str) -> bool {
    let mut parts = locale.split('-');
    let language_ok = parts
        .next()
        .map(|p| (2..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or(false);
    let region_ok = match parts.next() {
        None => true,
        Some(p) => (2..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()),
    };
    language_ok && region_ok && parts.next().is_none()
}

/// Machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidRequest,
    InsufficientData,
    StageTimeout,
    RetryExhausted,
    StageFailed,
    ComplianceBlocking,
    Publish,
    ReviewRejected,
    Cancelled,
}

impl FailureKind {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidRequest => 2,
            Self::InsufficientData => 3,
            Self::ComplianceBlocking => 4,
            Self::RetryExhausted => 5,
            Self::StageTimeout => 6,
            Self::Publish => 7,
            Self::ReviewRejected => 8,
            Self::StageFailed | Self::Cancelled => 1,
        }
    }
}

/// Exit code for a run parked on human review
pub const EXIT_AWAITING_REVIEW: i32 = 10;

/// Structured reason a run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
    pub exit_code: i32,
}

impl From<&PipelineError> for FailureReason {
    fn from(err: &PipelineError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            message: err.to_string(),
            exit_code: kind.exit_code(),
        }
    }
}

/// One entry of the per-run stage log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: StageStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

impl StageRecord {
    pub fn timing(&self) -> StageTiming {
        StageTiming {
            stage: self.stage,
            duration_ms: self.duration_ms,
            status: self.status,
            attempts: self.attempts,
        }
    }
}

/// Terminal (or parked) state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    Running,

    /// Checkpointed until the review ticket is resolved
    AwaitingReview { ticket_id: String },

    /// Published (or dry-run completed)
    Completed,

    /// Aborted with a structured reason
    Aborted { kind: FailureKind, reason: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}

/// A pipeline execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier for this run
    pub id: Uuid,

    pub request: RunRequest,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Ordered stage log
    pub stages: Vec<StageRecord>,

    /// Accumulated stage outputs (not available for runs rebuilt from events)
    #[serde(default)]
    pub pipeline_state: PipelineState,

    pub review_ticket: Option<String>,

    pub failure: Option<FailureReason>,

    /// Typed error for in-process callers
    #[serde(skip)]
    pub error: Option<PipelineError>,
}

impl PipelineRun {
    /// Create a new run for a request
    pub fn new(id: Uuid, request: RunRequest) -> Self {
        Self {
            id,
            request,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            stages: Vec::new(),
            pipeline_state: PipelineState::new(),
            review_ticket: None,
            failure: None,
            error: None,
        }
    }

    /// Rebuild a parked run from its checkpoint
    pub fn from_checkpoint(checkpoint: RunCheckpoint) -> Self {
        Self {
            id: checkpoint.run_id,
            request: checkpoint.request,
            state: RunState::AwaitingReview {
                ticket_id: checkpoint.ticket_id.clone(),
            },
            started_at: checkpoint.started_at,
            completed_at: None,
            stages: checkpoint.stages,
            pipeline_state: checkpoint.state,
            review_ticket: Some(checkpoint.ticket_id),
            failure: None,
            error: None,
        }
    }

    /// Reconstruct run status from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;
        let request = events
            .iter()
            .find(|e| e.event_type == EventType::RunStarted)
            .and_then(|e| e.data.clone())
            .and_then(|data| serde_json::from_value::<RunRequest>(data).ok())?;

        let mut run = Self::new(first_event.run_id, request);
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
            }
            EventType::StageCompleted | EventType::StageFailed => {
                if let Some(stage) = event.stage {
                    let duration_ms = event.duration_ms.unwrap_or(0);
                    let attempts = event
                        .data
                        .as_ref()
                        .and_then(|d| d.get("attempts"))
                        .and_then(|a| a.as_u64())
                        .unwrap_or(1) as u32;
                    self.stages.push(StageRecord {
                        stage,
                        started_at: event.timestamp
                            - ChronoDuration::milliseconds(duration_ms as i64),
                        ended_at: event.timestamp,
                        duration_ms,
                        status: event.status,
                        attempts,
                        error: event.error.clone(),
                    });
                }
            }
            EventType::ReviewRequested => {
                self.review_ticket = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("ticket_id"))
                    .and_then(|t| t.as_str())
                    .map(String::from);
            }
            EventType::ComplianceEvaluated => {
                if let Some(report) = event
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value::<ComplianceReport>(d).ok())
                {
                    self.pipeline_state = self.pipeline_state.apply(StateDelta::Report(report));
                }
            }
            EventType::PublishCompleted => {
                if let Some(receipt) = event
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value::<PublishReceipt>(d).ok())
                {
                    self.pipeline_state =
                        self.pipeline_state.apply(StateDelta::Published(receipt));
                }
            }
            EventType::RunSuspended => {
                if let Some(ticket_id) = self.review_ticket.clone() {
                    self.state = RunState::AwaitingReview { ticket_id };
                }
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunAborted => {
                let failure = event
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value::<FailureReason>(d).ok());
                let (kind, reason) = match &failure {
                    Some(f) => (f.kind, f.message.clone()),
                    None => (FailureKind::StageFailed, event.error.clone().unwrap_or_default()),
                };
                self.state = RunState::Aborted { kind, reason };
                self.failure = failure;
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted | EventType::ReviewResolved => {}
        }
    }

    /// Apply a stage delta to the run's pipeline state
    pub fn apply(&mut self, delta: StateDelta) {
        self.pipeline_state = self.pipeline_state.apply(delta);
    }

    pub fn record(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    pub fn complete(&mut self) {
        self.state = RunState::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn suspend(&mut self, ticket_id: String) {
        self.review_ticket = Some(ticket_id.clone());
        self.state = RunState::AwaitingReview { ticket_id };
    }

    pub fn abort(&mut self, error: PipelineError) {
        let failure = FailureReason::from(&error);
        self.state = RunState::Aborted {
            kind: failure.kind,
            reason: failure.message.clone(),
        };
        self.failure = Some(failure);
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RunState::Completed | RunState::Aborted { .. })
    }

    pub fn is_awaiting_review(&self) -> bool {
        matches!(self.state, RunState::AwaitingReview { .. })
    }

    pub fn total_duration_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn exit_code(&self) -> i32 {
        match &self.state {
            RunState::Completed => 0,
            RunState::AwaitingReview { .. } => EXIT_AWAITING_REVIEW,
            RunState::Aborted { kind, .. } => kind.exit_code(),
            RunState::Running => 1,
        }
    }

    /// Serializable summary of this run
    pub fn result(&self) -> PipelineResult {
        PipelineResult {
            run_id: self.id,
            success: matches!(self.state, RunState::Completed),
            tenant_id: self.request.tenant_id.clone(),
            item_id: self.request.item_id.clone(),
            locale: self.request.locale.clone(),
            dry_run: self.request.dry_run,
            state: self.state.clone(),
            effective_configs: self.pipeline_state.configs.clone(),
            compliance_report: self.pipeline_state.report.clone(),
            publish: self.pipeline_state.receipt.clone(),
            review_ticket: self.review_ticket.clone(),
            stage_timings: self.stages.iter().map(StageRecord::timing).collect(),
            total_duration_ms: self.total_duration_ms(),
            failure: self.failure.clone(),
        }
    }
}

/// Per-stage timing entry of a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: u64,
    pub status: StageStatus,
    pub attempts: u32,
}

/// What a run produced, as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub success: bool,
    pub tenant_id: String,
    pub item_id: String,
    pub locale: String,
    pub dry_run: bool,
    pub state: RunState,
    pub effective_configs: BTreeMap<String, EffectiveConfig>,
    pub compliance_report: Option<ComplianceReport>,
    pub publish: Option<PublishReceipt>,
    pub review_ticket: Option<String>,
    pub stage_timings: Vec<StageTiming>,
    pub total_duration_ms: u64,
    pub failure: Option<FailureReason>,
}

impl PipelineResult {
    pub fn exit_code(&self) -> i32 {
        match &self.state {
            RunState::Completed => 0,
            RunState::AwaitingReview { .. } => EXIT_AWAITING_REVIEW,
            RunState::Aborted { kind, .. } => kind.exit_code(),
            RunState::Running => 1,
        }
    }
}

/// Everything needed to continue a run parked on human review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: Uuid,
    pub request: RunRequest,
    pub ticket_id: String,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageRecord>,
    pub state: PipelineState,
}

impl RunCheckpoint {
    pub fn capture(run: &PipelineRun, ticket_id: &str) -> Self {
        Self {
            run_id: run.id,
            request: run.request.clone(),
            ticket_id: ticket_id.to_string(),
            started_at: run.started_at,
            stages: run.stages.clone(),
            state: run.pipeline_state.clone(),
        }
    }
}
