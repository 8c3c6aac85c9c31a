//! Validation results and the aggregated compliance report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::EffectiveConfig;

/// Scores equal to a threshold pass.
const SCORE_EPSILON: f64 = 1e-9;

/// The four validator categories of the compliance gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorCategory {
    Affiliate,
    Factual,
    Brand,
    Structure,
}

impl ValidatorCategory {
    pub const ALL: [ValidatorCategory; 4] = [
        ValidatorCategory::Affiliate,
        ValidatorCategory::Factual,
        ValidatorCategory::Brand,
        ValidatorCategory::Structure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Affiliate => "affiliate",
            Self::Factual => "factual",
            Self::Brand => "brand",
            Self::Structure => "structure",
        }
    }
}

impl fmt::Display for ValidatorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub category: ValidatorCategory,
    /// Always within 0.0..=10.0
    pub score: f64,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new(category: ValidatorCategory, score: f64) -> Self {
        Self {
            category,
            score: score.clamp(0.0, 10.0),
            blocking_issues: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_blocking(mut self, issue: impl Into<String>) -> Self {
        self.blocking_issues.push(issue.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Result for a validator that could not produce a verdict.
    pub fn fail_closed(category: ValidatorCategory, reason: &str) -> Self {
        Self::new(category, 0.0)
            .with_blocking(format!("{} validator failed: {}", category, reason))
    }

    pub fn is_blocking(&self) -> bool {
        !self.blocking_issues.is_empty()
    }
}

/// Per-category weights for the overall score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplianceWeights {
    #[serde(default = "default_affiliate_weight")]
    pub affiliate: f64,
    #[serde(default = "default_factual_weight")]
    pub factual: f64,
    #[serde(default = "default_brand_weight")]
    pub brand: f64,
    #[serde(default = "default_structure_weight")]
    pub structure: f64,
}

fn default_affiliate_weight() -> f64 {
    0.30
}

fn default_factual_weight() -> f64 {
    0.25
}

fn default_brand_weight() -> f64 {
    0.20
}

fn default_structure_weight() -> f64 {
    0.25
}

impl Default for ComplianceWeights {
    fn default() -> Self {
        Self {
            affiliate: default_affiliate_weight(),
            factual: default_factual_weight(),
            brand: default_brand_weight(),
            structure: default_structure_weight(),
        }
    }
}

impl ComplianceWeights {
    /// Read `weights.*` from the compliance chain, falling back per category
    pub fn from_config(config: &EffectiveConfig) -> Self {
        let defaults = Self::default();
        Self {
            affiliate: config.f64_or("weights.affiliate", defaults.affiliate),
            factual: config.f64_or("weights.factual", defaults.factual),
            brand: config.f64_or("weights.brand", defaults.brand),
            structure: config.f64_or("weights.structure", defaults.structure),
        }
    }

    pub fn weight(&self, category: ValidatorCategory) -> f64 {
        match category {
            ValidatorCategory::Affiliate => self.affiliate,
            ValidatorCategory::Factual => self.factual,
            ValidatorCategory::Brand => self.brand,
            ValidatorCategory::Structure => self.structure,
        }
    }

    pub fn sum(&self) -> f64 {
        self.affiliate + self.factual + self.brand + self.structure
    }
}

/// Score thresholds for routing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_publish_threshold")]
    pub publish: f64,
    #[serde(default = "default_review_threshold")]
    pub review: f64,
}

fn default_publish_threshold() -> f64 {
    8.0
}

fn default_review_threshold() -> f64 {
    6.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            publish: default_publish_threshold(),
            review: default_review_threshold(),
        }
    }
}

impl Thresholds {
    pub fn from_config(config: &EffectiveConfig) -> Self {
        let defaults = Self::default();
        Self {
            publish: config.f64_or("publish_threshold", defaults.publish),
            review: config.f64_or("review_threshold", defaults.review),
        }
    }
}

/// Human-readable quality label for an overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Failed,
}

impl QualityBand {
    pub fn from_score(score: f64) -> Self {
        if score + SCORE_EPSILON >= 9.0 {
            Self::Excellent
        } else if score + SCORE_EPSILON >= 7.5 {
            Self::Good
        } else if score + SCORE_EPSILON >= 6.0 {
            Self::Acceptable
        } else if score + SCORE_EPSILON >= 3.0 {
            Self::Poor
        } else {
            Self::Failed
        }
    }
}

/// Where the gate routes a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Publish,
    HumanReview,
    Abort,
}

/// Aggregated outcome of all validators for one draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub results: Vec<ValidationResult>,
    pub weights: ComplianceWeights,
    pub thresholds: Thresholds,
    pub overall_score: f64,
    pub publish_approved: bool,
    pub needs_human_review: bool,
    pub flagged_premium: bool,
    pub quality_band: QualityBand,
    /// Union of every validator's blocking issues
    pub blocking_issues: Vec<String>,
    pub warnings: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl ComplianceReport {
    /// Combine validator results. Order of `results` does not affect the outcome.
    pub fn aggregate(
        mut results: Vec<ValidationResult>,
        weights: ComplianceWeights,
        thresholds: Thresholds,
        flagged_premium: bool,
    ) -> Self {
        results.sort_by_key(|r| r.category);

        let overall_score: f64 = results
            .iter()
            .map(|r| weights.weight(r.category) * r.score)
            .sum();

        let blocking_issues: Vec<String> = results
            .iter()
            .flat_map(|r| r.blocking_issues.iter().cloned())
            .collect();
        let warnings: Vec<String> = results
            .iter()
            .flat_map(|r| r.warnings.iter().cloned())
            .collect();

        let publish_approved =
            overall_score + SCORE_EPSILON >= thresholds.publish && blocking_issues.is_empty();
        let needs_human_review = overall_score + SCORE_EPSILON < thresholds.review || flagged_premium;

        Self {
            quality_band: QualityBand::from_score(overall_score),
            results,
            weights,
            thresholds,
            overall_score,
            publish_approved,
            needs_human_review,
            flagged_premium,
            blocking_issues,
            warnings,
            evaluated_at: Utc::now(),
        }
    }

    /// Blocking issues abort; otherwise review beats publish.
    pub fn decision(&self) -> GateDecision {
        if !self.blocking_issues.is_empty() {
            GateDecision::Abort
        } else if self.needs_human_review {
            GateDecision::HumanReview
        } else if self.publish_approved {
            GateDecision::Publish
        } else {
            GateDecision::Abort
        }
    }

    pub fn result_for(&self, category: ValidatorCategory) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.category == category)
    }

    /// One-line summary safe for logs and events
    pub fn summary(&self) -> String {
        format!(
            "score {:.2} ({:?}), {} blocking, {} warnings",
            self.overall_score,
            self.quality_band,
            self.blocking_issues.len(),
            self.warnings.len()
        )
    }
}
