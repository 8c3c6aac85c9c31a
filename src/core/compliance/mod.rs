//! The blocking compliance gate.
//!
//! Four independent validators score a draft concurrently; the gate combines
//! them into a [`ComplianceReport`]. A validator that errors or panics is
//! treated as a failed validation (score 0 plus a blocking issue).

pub mod affiliate;
pub mod brand;
pub mod factual;
pub mod structure;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::domain::{
    ComplianceReport, ComplianceWeights, DraftSections, ResearchRecord, Thresholds,
    ValidationResult, ValidatorCategory, VoiceProfile,
};

use super::config_resolver::EffectiveConfig;

pub use affiliate::AffiliateValidator;
pub use brand::BrandValidator;
pub use factual::FactualValidator;
pub use structure::StructureValidator;

/// Everything a validator may look at
#[derive(Debug, Clone)]
pub struct ComplianceInput {
    pub draft: DraftSections,
    pub research: ResearchRecord,
    pub locale: String,
    pub voice: VoiceProfile,
    /// Effective `compliance` chain
    pub compliance: EffectiveConfig,
    /// Effective `content` chain (required sections, word count)
    pub content: EffectiveConfig,
}

impl ComplianceInput {
    pub fn flagged_premium(&self) -> bool {
        self.compliance.bool_or("premium", false)
    }
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("validator misconfigured: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

/// One scoring dimension of the gate
#[async_trait]
pub trait Validator: Send + Sync {
    fn category(&self) -> ValidatorCategory;

    async fn validate(&self, input: &ComplianceInput) -> Result<ValidationResult, ValidatorError>;
}

/// Runs the validators and aggregates their results
pub struct ComplianceGate {
    validators: Vec<Arc<dyn Validator>>,
}

impl Default for ComplianceGate {
    fn default() -> Self {
        Self::standard()
    }
}

impl ComplianceGate {
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// The four built-in validators
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(AffiliateValidator),
            Arc::new(FactualValidator),
            Arc::new(BrandValidator),
            Arc::new(StructureValidator),
        ])
    }

    /// Swap the validator for one category (tests, custom deployments)
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        let category = validator.category();
        self.validators.retain(|v| v.category() != category);
        self.validators.push(validator);
        self
    }

    /// Score a draft. Never fails: problems become blocking issues.
    #[instrument(skip(self, input), fields(locale = %input.locale))]
    pub async fn evaluate(&self, input: ComplianceInput) -> ComplianceReport {
        let input = Arc::new(input);

        let handles: Vec<_> = self
            .validators
            .iter()
            .map(|validator| {
                let validator = Arc::clone(validator);
                let input = Arc::clone(&input);
                let category = validator.category();
                let handle = tokio::spawn(async move { validator.validate(&input).await });
                (category, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (category, handle) in handles {
            let result = match handle.await {
                Ok(Ok(mut result)) => {
                    result.category = category;
                    result.score = result.score.clamp(0.0, 10.0);
                    result
                }
                Ok(Err(e)) => {
                    warn!(%category, error = %e, "Validator failed, failing closed");
                    ValidationResult::fail_closed(category, &e.to_string())
                }
                Err(join_error) => {
                    warn!(%category, error = %join_error, "Validator task panicked, failing closed");
                    ValidationResult::fail_closed(category, "validator task panicked")
                }
            };
            debug!(%category, score = result.score, blocking = result.blocking_issues.len(), "Validator finished");
            results.push(result);
        }

        for category in ValidatorCategory::ALL {
            if !results.iter().any(|r| r.category == category) {
                results.push(ValidationResult::fail_closed(category, "no validator registered"));
            }
        }

        let weights = ComplianceWeights::from_config(&input.compliance);
        if (weights.sum() - 1.0).abs() > 1e-6 {
            warn!(sum = weights.sum(), "Compliance weights do not sum to 1.0");
        }
        let thresholds = Thresholds::from_config(&input.compliance);

        ComplianceReport::aggregate(results, weights, thresholds, input.flagged_premium())
    }
}

/// Case-insensitive substring check used by the term lists
pub(crate) fn contains_term(haystack_lower: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    !term.is_empty() && haystack_lower.contains(&term)
}
