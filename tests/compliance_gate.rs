//! Compliance Gate Integration Tests
//!
//! Weighted aggregation, routing thresholds, fail-closed validators and the
//! four built-in validators on realistic drafts.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use ccms::core::{ComplianceGate, ComplianceInput, EffectiveConfig, Validator, ValidatorError};
use ccms::domain::{
    DraftSections, GateDecision, QualityBand, ValidationResult, ValidatorCategory, VoiceProfile,
};

use common::{compliant_draft, compliant_draft_with_bonus, research, LOCALE};

/// Returns a fixed score for one category
struct Scored(ValidatorCategory, f64);

#[async_trait]
impl Validator for Scored {
    fn category(&self) -> ValidatorCategory {
        self.0
    }

    async fn validate(&self, _: &ComplianceInput) -> Result<ValidationResult, ValidatorError> {
        Ok(ValidationResult::new(self.0, self.1))
    }
}

struct Broken(ValidatorCategory);

#[async_trait]
impl Validator for Broken {
    fn category(&self) -> ValidatorCategory {
        self.0
    }

    async fn validate(&self, _: &ComplianceInput) -> Result<ValidationResult, ValidatorError> {
        Err(ValidatorError::Internal("model endpoint unavailable".into()))
    }
}

fn scored_gate(scores: [f64; 4]) -> ComplianceGate {
    ComplianceGate::new(vec![
        Arc::new(Scored(ValidatorCategory::Affiliate, scores[0])),
        Arc::new(Scored(ValidatorCategory::Factual, scores[1])),
        Arc::new(Scored(ValidatorCategory::Brand, scores[2])),
        Arc::new(Scored(ValidatorCategory::Structure, scores[3])),
    ])
}

fn input(draft: DraftSections, compliance: Value) -> ComplianceInput {
    ComplianceInput {
        draft,
        research: research(),
        locale: LOCALE.to_string(),
        voice: VoiceProfile::default(),
        compliance: EffectiveConfig::from_value("compliance", compliance),
        content: EffectiveConfig::from_value("content", json!({ "min_word_count": 60 })),
    }
}

#[tokio::test]
async fn test_weighted_score_with_default_weights() {
    let report = scored_gate([9.0, 8.0, 7.0, 9.0])
        .evaluate(input(DraftSections::new(), json!({})))
        .await;

    // 9*.30 + 8*.25 + 7*.20 + 9*.25
    assert!((report.overall_score - 8.35).abs() < 1e-9);
    assert!(report.publish_approved);
    assert!(!report.needs_human_review);
    assert_eq!(report.quality_band, QualityBand::Good);
    assert_eq!(report.decision(), GateDecision::Publish);
}

#[tokio::test]
async fn test_tenant_weights_and_thresholds_apply() {
    let compliance = json!({
        "weights": { "affiliate": 0.1, "factual": 0.1, "brand": 0.7, "structure": 0.1 },
        "publish_threshold": 9.0
    });
    let report = scored_gate([10.0, 10.0, 7.0, 10.0])
        .evaluate(input(DraftSections::new(), compliance))
        .await;

    // 1.0 + 1.0 + 4.9 + 1.0
    assert!((report.overall_score - 7.9).abs() < 1e-9);
    assert!(!report.publish_approved);
    assert!(!report.needs_human_review);
    assert_eq!(report.thresholds.publish, 9.0);
    // Neither approved nor low enough for review
    assert_eq!(report.decision(), GateDecision::Abort);
}

#[tokio::test]
async fn test_low_score_routes_to_review() {
    let report = scored_gate([5.0, 6.0, 5.0, 5.0])
        .evaluate(input(DraftSections::new(), json!({})))
        .await;

    assert!(report.overall_score < 6.0);
    assert!(report.needs_human_review);
    assert_eq!(report.decision(), GateDecision::HumanReview);
}

#[tokio::test]
async fn test_failing_validator_fails_closed() {
    let gate = scored_gate([10.0, 10.0, 10.0, 10.0])
        .with_validator(Arc::new(Broken(ValidatorCategory::Factual)));

    let report = gate.evaluate(input(DraftSections::new(), json!({}))).await;

    let factual = report.result_for(ValidatorCategory::Factual).unwrap();
    assert_eq!(factual.score, 0.0);
    assert!(factual.is_blocking());
    assert!(!report.publish_approved);
    assert_eq!(report.decision(), GateDecision::Abort);
    assert!(report
        .blocking_issues
        .iter()
        .any(|issue| issue.contains("model endpoint unavailable")));
}

#[tokio::test]
async fn test_missing_validator_fails_closed() {
    let gate = ComplianceGate::new(vec![
        Arc::new(Scored(ValidatorCategory::Affiliate, 10.0)),
        Arc::new(Scored(ValidatorCategory::Factual, 10.0)),
        Arc::new(Scored(ValidatorCategory::Brand, 10.0)),
    ]);

    let report = gate.evaluate(input(DraftSections::new(), json!({}))).await;

    assert_eq!(report.results.len(), 4);
    assert_eq!(
        report.result_for(ValidatorCategory::Structure).unwrap().score,
        0.0
    );
    assert_eq!(report.decision(), GateDecision::Abort);
}

#[tokio::test]
async fn test_standard_gate_approves_compliant_draft() {
    let report = ComplianceGate::standard()
        .evaluate(input(compliant_draft(), json!({})))
        .await;

    assert!(report.blocking_issues.is_empty(), "{:?}", report.blocking_issues);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!((report.overall_score - 10.0).abs() < 1e-9);
    assert_eq!(report.quality_band, QualityBand::Excellent);
    assert_eq!(report.decision(), GateDecision::Publish);
}

#[tokio::test]
async fn test_standard_gate_blocks_unsupported_claim() {
    let report = ComplianceGate::standard()
        .evaluate(input(
            compliant_draft_with_bonus("Claim a 200% match up to £1,000 today."),
            json!({}),
        ))
        .await;

    let factual = report.result_for(ValidatorCategory::Factual).unwrap();
    assert!(factual.is_blocking());
    assert!(factual.score < 10.0);
    assert_eq!(report.decision(), GateDecision::Abort);
}

#[tokio::test]
async fn test_standard_gate_blocks_prohibited_claim_regardless_of_score() {
    let report = ComplianceGate::standard()
        .evaluate(input(
            compliant_draft_with_bonus("A 100% match up to £1,000, a guaranteed win for everyone."),
            json!({ "publish_threshold": 0.0 }),
        ))
        .await;

    assert!(report.overall_score > 8.0);
    assert!(!report.publish_approved);
    assert_eq!(report.decision(), GateDecision::Abort);
}

#[tokio::test]
async fn test_missing_section_is_blocking() {
    let mut draft = compliant_draft();
    draft.insert("payments", "   ");

    let report = ComplianceGate::standard()
        .evaluate(input(draft, json!({})))
        .await;

    assert!(report
        .blocking_issues
        .iter()
        .any(|issue| issue.contains("payments")));
    assert_eq!(report.decision(), GateDecision::Abort);
}

#[tokio::test]
async fn test_premium_flag_forces_review() {
    let report = ComplianceGate::standard()
        .evaluate(input(compliant_draft(), json!({ "premium": true })))
        .await;

    assert!(report.publish_approved);
    assert!(report.flagged_premium);
    assert_eq!(report.decision(), GateDecision::HumanReview);
}

#[tokio::test]
async fn test_brand_issues_only_warn() {
    let mut gate_input = input(compliant_draft(), json!({}));
    gate_input.voice = VoiceProfile {
        banned_phrases: vec!["solid choice".to_string()],
        ..VoiceProfile::default()
    };

    let report = ComplianceGate::standard().evaluate(gate_input).await;

    let brand = report.result_for(ValidatorCategory::Brand).unwrap();
    assert!(brand.score < 10.0);
    assert!(brand.blocking_issues.is_empty());
    assert!(!brand.warnings.is_empty());
    assert_eq!(report.decision(), GateDecision::Publish);
}
