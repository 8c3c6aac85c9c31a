//! Pipeline Scenario Tests
//!
//! End-to-end runs of the orchestrator against in-memory collaborators:
//! publish, abort paths, branch isolation, review escalation and resume,
//! cancellation, and replay of run status from the event log.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use ccms::adapters::StageError;
use ccms::core::{
    cancellation, publish_idempotency_key, Environment, HumanReviewGateway, PipelineSettings,
    ReviewMode,
};
use ccms::domain::{
    FailureKind, ReviewDecision, RunRequest, RunState, Stage, StageStatus, TicketStatus,
};
use ccms::errors::{PipelineBuildError, PipelineError, PublishError};

use common::*;

fn request() -> RunRequest {
    RunRequest::new(TENANT, ITEM, LOCALE)
}

fn stage_status(run: &ccms::PipelineRun, stage: Stage) -> Option<StageStatus> {
    run.stages.iter().find(|s| s.stage == stage).map(|s| s.status)
}

fn premium_layers() -> ccms::core::ConfigLayers {
    layers_with(json!({ "compliance": { "premium": true } }))
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_compliant_run_publishes() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.exit_code(), 0);
    assert_eq!(harness.publisher.call_count(), 1);

    let report = run.pipeline_state.report.as_ref().unwrap();
    assert!((report.overall_score - 10.0).abs() < 1e-9);
    assert!(report.publish_approved);
    assert!(report.blocking_issues.is_empty());

    let receipt = run.pipeline_state.receipt.as_ref().unwrap();
    assert_eq!(receipt.external_id, "post-1");

    let published = harness.publisher.published();
    let (draft, metadata) = &published[0];
    assert_eq!(metadata.idempotency_key, publish_idempotency_key(run.id));
    assert_eq!(metadata.status, "draft");
    assert!((metadata.overall_score.unwrap() - 10.0).abs() < 1e-9);
    assert_eq!(draft.assets["seo"]["keywords"][0], "Casino X");
    assert!(draft.assets.contains_key("media"));
    assert!(draft.sections.get("verdict").is_some());

    let order: Vec<Stage> = run.stages.iter().map(|s| s.stage).collect();
    assert_eq!(order.first(), Some(&Stage::Config));
    assert_eq!(order.last(), Some(&Stage::Metrics));
    let pos = |stage| order.iter().position(|s| *s == stage).unwrap();
    assert!(pos(Stage::Content) < pos(Stage::Seo));
    assert!(pos(Stage::Content) < pos(Stage::Media));
    assert!(pos(Stage::Merge) < pos(Stage::Comply));
    assert!(pos(Stage::Comply) < pos(Stage::Publish));
}

#[tokio::test]
async fn test_result_carries_effective_configs_and_timings() {
    let harness = Harness::new();
    let run = harness.orchestrator().run(request()).await.unwrap();
    let result = run.result();

    assert!(result.success);
    assert_eq!(result.exit_code(), 0);
    assert_eq!(
        result.effective_configs["content"].values["min_word_count"],
        json!(60)
    );
    assert_eq!(
        result.effective_configs["seo"].values["primary_keyword"],
        json!("Casino X")
    );
    assert!(result.stage_timings.iter().any(|t| t.stage == Stage::Publish));
    assert!(result.failure.is_none());
}

#[tokio::test]
async fn test_metrics_recorded_for_every_outcome() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    orchestrator.run(request()).await.unwrap();
    orchestrator
        .run(RunRequest::new(TENANT, ITEM, "not a locale"))
        .await
        .unwrap();

    let summaries = harness.metrics.wait_for(2).await;
    assert_eq!(summaries.len(), 2);

    let published = summaries.iter().find(|s| s.outcome == "published").unwrap();
    assert!(published.success);
    assert!((published.overall_score.unwrap() - 10.0).abs() < 1e-9);

    let aborted = summaries.iter().find(|s| s.outcome == "aborted").unwrap();
    assert_eq!(aborted.failure_kind.as_deref(), Some("invalid_request"));
}

#[tokio::test]
async fn test_slow_metrics_write_is_flushed_for_failed_and_parked_runs() {
    let harness = Harness::with_metrics(MemoryMetrics::slow(Duration::from_millis(50)));
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(premium_layers())))
        .build()
        .unwrap();

    let rejected = orchestrator
        .run(RunRequest::new(TENANT, ITEM, "not a locale"))
        .await
        .unwrap();
    let parked = orchestrator.run(request()).await.unwrap();
    assert_eq!(rejected.exit_code(), 2);
    assert_eq!(parked.exit_code(), 10);

    // What the CLI does before exiting with a non-zero code
    assert!(orchestrator.flush_metrics(Duration::from_secs(5)).await);

    let summaries = harness.metrics.summaries();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().any(|s| s.outcome == "aborted"));
    assert!(summaries.iter().any(|s| s.outcome == "awaiting_review"));
}

// ============================================================================
// Compliance outcomes
// ============================================================================

#[tokio::test]
async fn test_unsupported_bonus_claim_blocks_publication() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .content(Arc::new(StaticContent::new(compliant_draft_with_bonus(
            "New players get a 100% match up to £5,000 on the first deposit.",
        ))))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 4);
    assert!(matches!(
        run.state,
        RunState::Aborted {
            kind: FailureKind::ComplianceBlocking,
            ..
        }
    ));
    assert_eq!(harness.publisher.call_count(), 0);
    assert!(stage_status(&run, Stage::Publish).is_none());

    let report = run.pipeline_state.report.as_ref().unwrap();
    assert!(!report.publish_approved);
    assert!(report
        .blocking_issues
        .iter()
        .any(|issue| issue.contains("£5,000")));

    match &run.error {
        Some(PipelineError::ComplianceBlocking { report }) => {
            assert!(!report.blocking_issues.is_empty());
        }
        other => panic!("expected ComplianceBlocking, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prohibited_claim_blocks_publication() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .content(Arc::new(StaticContent::new(compliant_draft_with_bonus(
            "A 100% match up to £1,000 and it is completely risk-free.",
        ))))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 4);
    assert_eq!(harness.publisher.call_count(), 0);
}

#[tokio::test]
async fn test_skip_compliance_rejected_in_production() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let run = orchestrator
        .run(request().with_skip_compliance(true))
        .await
        .unwrap();

    assert_eq!(run.exit_code(), 2);
    assert!(matches!(run.error, Some(PipelineError::InvalidRequest(_))));
    assert!(stage_status(&run, Stage::Config).is_none());
    assert_eq!(harness.publisher.call_count(), 0);
}

#[tokio::test]
async fn test_skip_compliance_publishes_blocked_draft_outside_production() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .content(Arc::new(StaticContent::new(compliant_draft_with_bonus(
            "A 100% match up to £5,000.",
        ))))
        .settings(PipelineSettings {
            environment: Environment::Development,
            ..Default::default()
        })
        .build()
        .unwrap();

    let run = orchestrator
        .run(request().with_skip_compliance(true))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(harness.publisher.call_count(), 1);
    // The report is still computed and kept
    assert!(!run.pipeline_state.report.unwrap().blocking_issues.is_empty());
}

// ============================================================================
// Fail-fast and errors
// ============================================================================

#[tokio::test]
async fn test_thin_research_fails_before_content() {
    let harness = Harness::new();
    let content = Arc::new(StaticContent::new(compliant_draft()));
    let orchestrator = harness
        .builder()
        .research(Arc::new(StaticResearch::new(thin_research())))
        .content(content.clone())
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 3);
    assert!(matches!(
        run.error,
        Some(PipelineError::InsufficientData {
            found: 4,
            required: 5
        })
    ));
    assert_eq!(content.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.publisher.call_count(), 0);
}

#[tokio::test]
async fn test_min_populated_fields_is_configurable() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(layers_with(json!({
            "research": { "min_populated_fields": 4 }
        })))))
        .research(Arc::new(StaticResearch::new(thin_research())))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert!(!matches!(
        run.error,
        Some(PipelineError::InsufficientData { .. })
    ));
}

#[tokio::test]
async fn test_invalid_locale_rejected() {
    let harness = Harness::new();
    let run = harness
        .orchestrator()
        .run(RunRequest::new(TENANT, ITEM, "english"))
        .await
        .unwrap();

    assert_eq!(run.exit_code(), 2);
}

#[tokio::test]
async fn test_transient_research_failures_are_retried() {
    let harness = Harness::new();
    let research = Arc::new(StaticResearch::new(research()).failing_first(vec![
        StageError::Retryable("503".into()),
        StageError::Retryable("503".into()),
    ]));
    let orchestrator = harness.builder().research(research.clone()).build().unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(research.calls.load(Ordering::SeqCst), 3);
    let record = run.stages.iter().find(|s| s.stage == Stage::Research).unwrap();
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn test_research_retries_exhausted() {
    let harness = Harness::new();
    let research = Arc::new(StaticResearch::new(research()).failing_first(vec![
        StageError::Retryable("503".into()),
        StageError::Retryable("503".into()),
        StageError::Retryable("503".into()),
    ]));
    let orchestrator = harness.builder().research(research.clone()).build().unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 5);
    assert!(matches!(
        run.error,
        Some(PipelineError::RetryExhausted {
            stage: Stage::Research,
            attempts: 3,
            ..
        })
    ));
    assert_eq!(research.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_fatal_research_error_is_not_retried() {
    let harness = Harness::new();
    let research = Arc::new(
        StaticResearch::new(research())
            .failing_first(vec![StageError::Fatal("unknown casino".into())]),
    );
    let orchestrator = harness.builder().research(research.clone()).build().unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 1);
    assert!(matches!(
        run.error,
        Some(PipelineError::StageFailed {
            stage: Stage::Research,
            ..
        })
    ));
    assert_eq!(research.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_content_stage_timeout() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(layers_with(json!({
            "content": { "timeout_ms": 50 }
        })))))
        .content(Arc::new(
            StaticContent::new(compliant_draft()).slow(Duration::from_secs(5)),
        ))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 6);
    assert!(matches!(
        run.error,
        Some(PipelineError::StageTimeout {
            stage: Stage::Content,
            timeout_ms: 50
        })
    ));
    assert_eq!(stage_status(&run, Stage::Content), Some(StageStatus::Failed));
}

// ============================================================================
// Publishing
// ============================================================================

#[tokio::test]
async fn test_dry_run_never_calls_publisher() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let run = orchestrator
        .run(request().with_dry_run(true))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(harness.publisher.call_count(), 0);
    assert!(run.pipeline_state.receipt.is_none());
    assert_eq!(stage_status(&run, Stage::Publish), Some(StageStatus::Skipped));

    // The event log agrees with the returned run
    let replayed = orchestrator.status(run.id).await.unwrap();
    assert_eq!(
        stage_status(&replayed, Stage::Publish),
        Some(StageStatus::Skipped)
    );

    let summaries = harness.metrics.wait_for(1).await;
    assert_eq!(summaries[0].outcome, "dry_run");
}

#[tokio::test]
async fn test_retryable_publish_failures_reuse_idempotency_key() {
    let harness = Harness::with_publisher(RecordingPublisher::new().failing_first(vec![
        StageError::Retryable("429".into()),
        StageError::Retryable("503".into()),
    ]));

    let run = harness.orchestrator().run(request()).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(harness.publisher.call_count(), 3);
    assert_eq!(harness.publisher.published().len(), 1);
    let record = run.stages.iter().find(|s| s.stage == Stage::Publish).unwrap();
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn test_ambiguous_publish_is_reported_not_retried() {
    let harness = Harness::with_publisher(
        RecordingPublisher::new()
            .failing_first(vec![StageError::Ambiguous("connection reset after send".into())]),
    );

    let run = harness.orchestrator().run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 7);
    assert!(matches!(
        run.error,
        Some(PipelineError::Publish(PublishError::Ambiguous(_)))
    ));
    assert_eq!(harness.publisher.call_count(), 1);
}

#[tokio::test]
async fn test_rejected_publish_is_not_published() {
    let harness = Harness::with_publisher(
        RecordingPublisher::new().failing_first(vec![StageError::Fatal("401".into())]),
    );

    let run = harness.orchestrator().run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 7);
    assert!(matches!(
        run.error,
        Some(PipelineError::Publish(PublishError::NotPublished(_)))
    ));
}

// ============================================================================
// Branches
// ============================================================================

#[tokio::test]
async fn test_branch_key_collision_rejected_at_build() {
    let harness = Harness::new();
    let result = harness
        .builder()
        .seo(Arc::new(StaticBranch::new("seo", &["seo"], json!({ "seo": {} }))))
        .media(Arc::new(StaticBranch::new(
            "media",
            &["media", "seo"],
            json!({ "media": {} }),
        )))
        .build();

    assert!(matches!(
        result,
        Err(PipelineBuildError::KeyCollision { ref key, .. }) if key == "seo"
    ));
}

#[tokio::test]
async fn test_branch_writing_undeclared_key_fails_the_run() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .media(Arc::new(StaticBranch::new(
            "media",
            &["media"],
            json!({ "media": {}, "title": "sneaky" }),
        )))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert!(matches!(
        run.error,
        Some(PipelineError::StageFailed {
            stage: Stage::Media,
            ..
        })
    ));
    assert_eq!(harness.publisher.call_count(), 0);
}

#[tokio::test]
async fn test_custom_branches_merge_disjoint_outputs() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .seo(Arc::new(StaticBranch::new(
            "seo",
            &["seo", "schema"],
            json!({ "seo": { "title": "T" }, "schema": ["Review"] }),
        )))
        .media(Arc::new(StaticBranch::new(
            "media",
            &["media"],
            json!({ "media": { "hero": "hero.webp" } }),
        )))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    let assets = &run.pipeline_state.assets;
    assert_eq!(assets.len(), 3);
    assert_eq!(assets["schema"], json!(["Review"]));
    assert_eq!(assets["media"]["hero"], "hero.webp");
}

#[tokio::test]
async fn test_seo_and_media_run_concurrently() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .seo(Arc::new(
            StaticBranch::new("seo", &["seo"], json!({ "seo": { "title": "T" } }))
                .slow(Duration::from_millis(300)),
        ))
        .media(Arc::new(
            StaticBranch::new("media", &["media"], json!({ "media": { "hero": "h.webp" } }))
                .slow(Duration::from_millis(300)),
        ))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();
    assert_eq!(run.state, RunState::Completed);

    let seo = run.stages.iter().find(|s| s.stage == Stage::Seo).unwrap();
    let media = run.stages.iter().find(|s| s.stage == Stage::Media).unwrap();
    assert!(seo.duration_ms >= 300 && media.duration_ms >= 300);
    // Each branch started before the other finished
    assert!(seo.started_at < media.ended_at);
    assert!(media.started_at < seo.ended_at);
}

#[tokio::test]
async fn test_branch_timeout_aborts_run_and_discards_sibling_output() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(layers_with(
            json!({ "media": { "timeout_ms": 50 } }),
        ))))
        .seo(Arc::new(StaticBranch::new(
            "seo",
            &["seo"],
            json!({ "seo": { "title": "T" } }),
        )))
        .media(Arc::new(
            StaticBranch::new("media", &["media"], json!({ "media": { "hero": "h.webp" } }))
                .slow(Duration::from_millis(500)),
        ))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert!(matches!(
        run.error,
        Some(PipelineError::StageTimeout {
            stage: Stage::Media,
            timeout_ms: 50
        })
    ));
    assert_eq!(run.exit_code(), 6);
    assert!(run.pipeline_state.branches.is_empty());
    assert!(run.pipeline_state.assets.is_empty());
    assert!(run.pipeline_state.report.is_none());
    assert_eq!(harness.publisher.call_count(), 0);
}

// ============================================================================
// Human review
// ============================================================================

#[tokio::test]
async fn test_premium_run_parks_on_review_and_resumes_after_approval() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(premium_layers())))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    let ticket_id = match &run.state {
        RunState::AwaitingReview { ticket_id } => ticket_id.clone(),
        other => panic!("expected AwaitingReview, got {:?}", other),
    };
    assert_eq!(run.exit_code(), 10);
    assert_eq!(harness.publisher.call_count(), 0);

    let gateway = orchestrator.review_gateway();
    let ticket = gateway.get(&ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Pending);
    assert_eq!(ticket.run_id, run.id);
    assert!(ticket.flagged_premium);

    // Status replay sees the parked run
    let status = orchestrator.status(run.id).await.unwrap();
    assert!(status.is_awaiting_review());

    // Resuming while pending changes nothing
    let pending = orchestrator.resume(run.id).await.unwrap();
    assert!(pending.is_awaiting_review());
    assert_eq!(harness.publisher.call_count(), 0);

    gateway
        .resolve(&ticket_id, ReviewDecision::Approve, Some("sam"), None)
        .await
        .unwrap();

    let resumed = orchestrator.resume(run.id).await.unwrap();
    assert_eq!(resumed.state, RunState::Completed);
    assert_eq!(harness.publisher.call_count(), 1);
    assert_eq!(
        harness.publisher.published()[0].1.idempotency_key,
        publish_idempotency_key(run.id)
    );

    // A second resume is a no-op
    let again = orchestrator.resume(run.id).await.unwrap();
    assert_eq!(again.state, RunState::Completed);
    assert_eq!(harness.publisher.call_count(), 1);

    let replayed = orchestrator.status(run.id).await.unwrap();
    assert_eq!(replayed.state, RunState::Completed);
    assert_eq!(replayed.pipeline_state.receipt.unwrap().external_id, "post-1");
}

#[tokio::test]
async fn test_rejected_review_aborts_on_resume() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(premium_layers())))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();
    let ticket_id = run.review_ticket.clone().unwrap();

    orchestrator
        .review_gateway()
        .resolve(&ticket_id, ReviewDecision::Reject, Some("sam"), Some("tone"))
        .await
        .unwrap();

    let resumed = orchestrator.resume(run.id).await.unwrap();
    assert_eq!(resumed.exit_code(), 8);
    assert!(matches!(
        resumed.error,
        Some(PipelineError::ReviewRejected { .. })
    ));
    assert_eq!(harness.publisher.call_count(), 0);

    let replayed = orchestrator.status(run.id).await.unwrap();
    assert!(matches!(
        replayed.state,
        RunState::Aborted {
            kind: FailureKind::ReviewRejected,
            ..
        }
    ));
}

#[tokio::test]
async fn test_synchronous_review_waits_for_approval() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(premium_layers())))
        .settings(PipelineSettings {
            review_mode: ReviewMode::Synchronous,
            review_timeout_seconds: Some(10),
            ..Default::default()
        })
        .build()
        .unwrap();

    let reviewer = harness.gateway();
    let approver = tokio::spawn(async move {
        loop {
            let pending = reviewer.list(Some(TicketStatus::Pending)).await.unwrap();
            if let Some(ticket) = pending.first() {
                reviewer
                    .resolve(&ticket.id, ReviewDecision::Approve, Some("sam"), None)
                    .await
                    .unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let run = orchestrator.run(request()).await.unwrap();
    approver.await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(harness.publisher.call_count(), 1);
    assert_eq!(
        stage_status(&run, Stage::HumanReview),
        Some(StageStatus::Completed)
    );
}

#[tokio::test]
async fn test_review_poll_interval_comes_from_config() {
    let harness = Harness::new();
    // The gateway alone would poll every two seconds
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(layers_with(json!({
            "compliance": { "premium": true },
            "review": { "poll_interval_ms": 10 }
        })))))
        .review_gateway(HumanReviewGateway::new(
            harness.dir.path().join("review").join("tickets.jsonl"),
        ))
        .settings(PipelineSettings {
            review_mode: ReviewMode::Synchronous,
            review_timeout_seconds: Some(10),
            ..Default::default()
        })
        .build()
        .unwrap();

    let reviewer = harness.gateway();
    let approver = tokio::spawn(async move {
        loop {
            let pending = reviewer.list(Some(TicketStatus::Pending)).await.unwrap();
            if let Some(ticket) = pending.first() {
                reviewer
                    .resolve(&ticket.id, ReviewDecision::Approve, Some("sam"), None)
                    .await
                    .unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let run = orchestrator.run(request()).await.unwrap();
    approver.await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    let review = run
        .stages
        .iter()
        .find(|s| s.stage == Stage::HumanReview)
        .unwrap();
    assert!(review.duration_ms < 1500, "waited {}ms", review.duration_ms);
}

#[tokio::test]
async fn test_synchronous_review_times_out() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .config_store(Arc::new(StaticConfigStore::new(premium_layers())))
        .settings(PipelineSettings {
            review_mode: ReviewMode::Synchronous,
            review_timeout_seconds: Some(1),
            ..Default::default()
        })
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();

    assert_eq!(run.exit_code(), 6);
    assert!(matches!(
        run.error,
        Some(PipelineError::StageTimeout {
            stage: Stage::HumanReview,
            ..
        })
    ));
    assert_eq!(harness.publisher.call_count(), 0);
}

// ============================================================================
// Concurrency and cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_are_independent() {
    let harness = Harness::new();
    let orchestrator = Arc::new(harness.orchestrator());

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.run(request()).await.unwrap() })
        })
        .collect();

    let mut run_ids = Vec::new();
    for handle in handles {
        let run = handle.await.unwrap();
        assert_eq!(run.state, RunState::Completed);
        run_ids.push(run.id);
    }
    run_ids.sort();
    run_ids.dedup();
    assert_eq!(run_ids.len(), 5);

    assert_eq!(harness.publisher.call_count(), 5);
    let keys: std::collections::BTreeSet<_> = harness
        .publisher
        .published()
        .into_iter()
        .map(|(_, m)| m.idempotency_key)
        .collect();
    assert_eq!(keys.len(), 5);

    let listed = orchestrator.list_runs(10).await.unwrap();
    assert_eq!(listed.len(), 5);
}

#[tokio::test]
async fn test_cancellation_stops_at_next_stage_boundary() {
    let harness = Harness::new();
    let (handle, token) = cancellation();
    let orchestrator = harness
        .builder()
        .content(Arc::new(StaticContent::new(compliant_draft()).cancelling(handle)))
        .build()
        .unwrap();

    let run = orchestrator.run_with_cancel(request(), token).await.unwrap();

    assert!(matches!(
        run.error,
        Some(PipelineError::Cancelled { stage: Stage::Seo })
    ));
    assert_eq!(run.exit_code(), 1);
    assert_eq!(stage_status(&run, Stage::Content), Some(StageStatus::Completed));
    assert!(stage_status(&run, Stage::Seo).is_none());
    assert_eq!(harness.publisher.call_count(), 0);
}

// ============================================================================
// Status and listing
// ============================================================================

#[tokio::test]
async fn test_status_replays_aborted_run() {
    let harness = Harness::new();
    let orchestrator = harness
        .builder()
        .research(Arc::new(StaticResearch::new(thin_research())))
        .build()
        .unwrap();

    let run = orchestrator.run(request()).await.unwrap();
    let replayed = orchestrator.status(run.id).await.unwrap();

    assert_eq!(replayed.id, run.id);
    assert_eq!(replayed.request, run.request);
    assert!(matches!(
        replayed.state,
        RunState::Aborted {
            kind: FailureKind::InsufficientData,
            ..
        }
    ));
    assert_eq!(replayed.failure.as_ref().unwrap().exit_code, 3);
    assert_eq!(replayed.exit_code(), 3);
    assert!(replayed.stages.iter().any(|s| s.stage == Stage::Research));
}

#[tokio::test]
async fn test_status_of_unknown_run_fails() {
    let harness = Harness::new();
    let result = harness.orchestrator().status(uuid::Uuid::new_v4()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_list_runs_newest_first_with_limit() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(orchestrator.run(request().with_dry_run(true)).await.unwrap().id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let listed = orchestrator.list_runs(2).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, ids[2]);
    assert_eq!(listed[1].id, ids[1]);
}
