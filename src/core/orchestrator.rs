//! Main orchestrator for pipeline execution.
//!
//! Interprets the fixed stage table
//! `CONFIG → RESEARCH → CONTENT → {SEO ∥ MEDIA} → MERGE → COMPLY →
//! {PUBLISH | HUMAN_REVIEW | ABORTED} → METRICS`, logging every transition
//! to the run's event store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{BranchProducer, StageError};
use crate::domain::{
    BranchDelta, DraftSections, Event, EventType, GateDecision, PipelineRun, PublishMetadata,
    ReviewSubject, ReviewTicket, RunCheckpoint, RunRequest, Stage, StageStatus, StateDelta,
    TicketStatus,
};
use crate::errors::PipelineError;

use super::compliance::{ComplianceGate, ComplianceInput};
use super::config_resolver::{ConfigResolver, EffectiveConfig};
use super::event_store::{publish_idempotency_key, EventStore};
use super::metrics::{MetricsRecorder, RunSummary};
use super::pipeline::{
    default_retry_policy, default_timeout, Collaborators, PipelineBuilder, PipelineSettings,
    ReviewMode,
};
use super::retry::RetryPolicy;
use super::review::{HumanReviewGateway, ReviewError};
use super::stage::{CancelToken, StageRunner};

/// How a run left the stage table
enum Flow {
    Completed,
    Suspended { ticket_id: String },
}

/// Result of one fan-out branch, carrying its stage record either way
type BranchOutcome = std::result::Result<
    (BranchDelta, crate::domain::StageRecord),
    (PipelineError, crate::domain::StageRecord),
>;

/// Main pipeline orchestrator
pub struct PipelineOrchestrator {
    collaborators: Collaborators,
    gate: ComplianceGate,
    review: HumanReviewGateway,
    metrics: MetricsRecorder,
    settings: PipelineSettings,
    runs_dir: PathBuf,
}

impl PipelineOrchestrator {
    pub(crate) fn from_parts(
        collaborators: Collaborators,
        gate: ComplianceGate,
        review: HumanReviewGateway,
        metrics: MetricsRecorder,
        settings: PipelineSettings,
        runs_dir: PathBuf,
    ) -> Self {
        Self {
            collaborators,
            gate,
            review,
            metrics,
            settings,
            runs_dir,
        }
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn review_gateway(&self) -> &HumanReviewGateway {
        &self.review
    }

    /// Wait for metrics writes of finished runs; call before exiting the process
    pub async fn flush_metrics(&self, limit: Duration) -> bool {
        self.metrics.flush(limit).await
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Execute one run to a terminal (or parked) state
    pub async fn run(&self, request: RunRequest) -> Result<PipelineRun> {
        self.run_with_cancel(request, CancelToken::never()).await
    }

    /// Like [`run`](Self::run), honoring `cancel` at stage boundaries up to COMPLY
    #[instrument(skip(self, request, cancel), fields(tenant = %request.tenant_id, item = %request.item_id, locale = %request.locale))]
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        cancel: CancelToken,
    ) -> Result<PipelineRun> {
        let run_id = Uuid::new_v4();
        info!(%run_id, dry_run = request.dry_run, "Starting pipeline run");

        let store = EventStore::open_in(&self.runs_dir, run_id).await?;
        let mut run = PipelineRun::new(run_id, request);

        let request_json =
            serde_json::to_value(&run.request).context("Failed to serialize run request")?;
        let start_event = Event::new(
            run_id,
            None,
            EventType::RunStarted,
            format!("{}:start", run_id),
            format!(
                "Run started for {}/{} ({})",
                run.request.tenant_id, run.request.item_id, run.request.locale
            ),
            StageStatus::Running,
        )
        .with_data(request_json);
        store.append(&start_event).await?;

        let outcome = self.drive(&store, &mut run, &cancel).await;
        self.finish(&store, run, outcome).await
    }

    /// Continue a run parked on human review
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn resume(&self, run_id: Uuid) -> Result<PipelineRun> {
        let current = self.status(run_id).await?;
        if current.is_finished() {
            info!("Run already finished, nothing to resume");
            return Ok(current);
        }

        let store = EventStore::open_in(&self.runs_dir, run_id).await?;
        let checkpoint = store
            .load_checkpoint()
            .await?
            .with_context(|| format!("Run {} has no review checkpoint to resume from", run_id))?;

        let mut run = PipelineRun::from_checkpoint(checkpoint);
        let ticket_id = run
            .review_ticket
            .clone()
            .context("Checkpoint carries no review ticket")?;
        let ticket = self
            .review
            .get(&ticket_id)
            .await?
            .with_context(|| format!("Review ticket {} not found", ticket_id))?;

        let outcome = match ticket.status {
            TicketStatus::Pending => {
                info!(%ticket_id, "Review still pending");
                return Ok(run);
            }
            TicketStatus::Rejected => {
                log_event(&store, review_resolved_event(run.id, &ticket)).await;
                Err(PipelineError::ReviewRejected { ticket_id })
            }
            TicketStatus::Approved => {
                log_event(&store, review_resolved_event(run.id, &ticket)).await;
                let runner = StageRunner::new(&store, run.id);
                self.publish(&store, &runner, &mut run).await
            }
        };

        self.finish(&store, run, outcome).await
    }

    /// Get status of a run by ID
    pub async fn status(&self, run_id: Uuid) -> Result<PipelineRun> {
        if !self.runs_dir.join(run_id.to_string()).exists() {
            anyhow::bail!("Run {} not found", run_id);
        }

        let store = EventStore::open_in(&self.runs_dir, run_id).await?;
        let events = store.replay().await?;

        if events.is_empty() {
            anyhow::bail!("Run {} not found", run_id);
        }

        PipelineRun::from_events(&events).context("Failed to reconstruct run state")
    }

    /// List recent runs, newest first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let run_ids = EventStore::list_runs_in(&self.runs_dir).await?;
        let mut runs = Vec::new();

        for run_id in run_ids {
            if let Ok(run) = self.status(run_id).await {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);

        Ok(runs)
    }

    async fn drive(
        &self,
        store: &EventStore,
        run: &mut PipelineRun,
        cancel: &CancelToken,
    ) -> std::result::Result<Flow, PipelineError> {
        let request = run.request.clone();
        request.validate()?;

        if request.skip_compliance && !self.settings.environment.allows_compliance_bypass() {
            return Err(PipelineError::InvalidRequest(format!(
                "skip_compliance is not honored in {}",
                self.settings.environment.as_str()
            )));
        }

        let runner = StageRunner::new(store, run.id);

        // CONFIG
        cancel.check(Stage::Config)?;
        let config_store = Arc::clone(&self.collaborators.config_store);
        let (tenant_id, item_id) = (request.tenant_id.clone(), request.item_id.clone());
        let (result, record) = runner
            .run_retrying(
                Stage::Config,
                default_timeout(Stage::Config),
                default_retry_policy(Stage::Config),
                move |_| {
                    let store = Arc::clone(&config_store);
                    let (tenant_id, item_id) = (tenant_id.clone(), item_id.clone());
                    async move { store.load_layers(&tenant_id, &item_id).await }
                },
            )
            .await;
        run.record(record);
        let layers = result?;

        let voice = match layers.tenant(&request.tenant_id) {
            Some(tenant) => {
                if !tenant.supports_locale(&request.locale) {
                    warn!(locale = %request.locale, "Locale is not listed for this tenant");
                }
                tenant.voice.clone()
            }
            None => {
                warn!("No tenant config found, using global defaults");
                Default::default()
            }
        };
        let mut resolver = ConfigResolver::new(layers);
        let configs = resolver.resolve_all(&request.tenant_id, &request.item_id);
        run.apply(StateDelta::Configs { configs, voice });

        // RESEARCH
        cancel.check(Stage::Research)?;
        let config = run.pipeline_state.config("research");
        let provider = Arc::clone(&self.collaborators.research);
        let (item_id, locale) = (request.item_id.clone(), request.locale.clone());
        let (result, record) = runner
            .run_retrying(
                Stage::Research,
                stage_timeout(Stage::Research, &config),
                stage_policy(Stage::Research, &config),
                move |_| {
                    let provider = Arc::clone(&provider);
                    let (item_id, locale) = (item_id.clone(), locale.clone());
                    async move { provider.fetch(&item_id, &locale).await }
                },
            )
            .await;
        run.record(record);
        let research = result?;

        let required = config.u64_or("min_populated_fields", 5) as usize;
        let found = research.populated_fields();
        run.apply(StateDelta::Research(research));
        if found < required {
            return Err(PipelineError::InsufficientData { found, required });
        }

        // CONTENT
        cancel.check(Stage::Content)?;
        let config = run.pipeline_state.config("content");
        let generator = Arc::clone(&self.collaborators.content);
        let research = Arc::new(run.pipeline_state.research.clone().unwrap_or_default());
        let content_config = Arc::new(config.clone());
        let (result, record) = runner
            .run_retrying(
                Stage::Content,
                stage_timeout(Stage::Content, &config),
                stage_policy(Stage::Content, &config),
                move |_| {
                    let generator = Arc::clone(&generator);
                    let research = Arc::clone(&research);
                    let config = Arc::clone(&content_config);
                    async move { generator.generate(&research, &config).await }
                },
            )
            .await;
        run.record(record);
        run.apply(StateDelta::Draft(result?));

        // SEO ∥ MEDIA
        cancel.check(Stage::Seo)?;
        let draft = Arc::new(run.pipeline_state.draft.clone().unwrap_or_default());
        let seo = run_branch(
            &runner,
            Stage::Seo,
            Arc::clone(&self.collaborators.seo),
            Arc::clone(&draft),
            run.pipeline_state.config("seo"),
        );
        let media = run_branch(
            &runner,
            Stage::Media,
            Arc::clone(&self.collaborators.media),
            Arc::clone(&draft),
            run.pipeline_state.config("media"),
        );
        match tokio::try_join!(seo, media) {
            Ok(((seo_delta, seo_record), (media_delta, media_record))) => {
                run.record(seo_record);
                run.record(media_record);
                run.apply(StateDelta::Branch {
                    name: self.collaborators.seo.name().to_string(),
                    delta: seo_delta,
                });
                run.apply(StateDelta::Branch {
                    name: self.collaborators.media.name().to_string(),
                    delta: media_delta,
                });
            }
            Err((err, record)) => {
                run.record(record);
                return Err(err);
            }
        }

        // MERGE
        let branches = run.pipeline_state.branches.clone();
        let (result, record) = runner
            .run(Stage::Merge, default_timeout(Stage::Merge), async move {
                merge_branches(&branches)
            })
            .await;
        run.record(record);
        run.apply(StateDelta::Merged(result?));

        // COMPLY
        cancel.check(Stage::Comply)?;
        let state = &run.pipeline_state;
        let compliance = state.config("compliance");
        let timeout = stage_timeout(Stage::Comply, &compliance);
        let input = ComplianceInput {
            draft: state.draft.clone().unwrap_or_default(),
            research: state.research.clone().unwrap_or_default(),
            locale: request.locale.clone(),
            voice: state.voice.clone(),
            compliance,
            content: state.config("content"),
        };
        let (result, record) = runner
            .run(Stage::Comply, timeout, async {
                Ok(self.gate.evaluate(input).await)
            })
            .await;
        run.record(record);
        let report = result?;

        let report_json = serde_json::to_value(&report).unwrap_or_default();
        log_event(
            store,
            Event::new(
                run.id,
                Some(Stage::Comply),
                EventType::ComplianceEvaluated,
                format!("{}:comply:report", run.id),
                report.summary(),
                StageStatus::Completed,
            )
            .with_data(report_json),
        )
        .await;
        run.apply(StateDelta::Report(report.clone()));

        let decision = report.decision();
        info!(
            score = report.overall_score,
            blocking = report.blocking_issues.len(),
            ?decision,
            "Compliance gate evaluated"
        );

        if request.skip_compliance && decision != GateDecision::Publish {
            warn!(
                environment = self.settings.environment.as_str(),
                ?decision,
                "Compliance gate bypassed by request"
            );
            return self.publish(store, &runner, run).await;
        }

        match decision {
            GateDecision::Publish => self.publish(store, &runner, run).await,
            GateDecision::HumanReview => self.escalate(store, &runner, run).await,
            GateDecision::Abort => Err(PipelineError::ComplianceBlocking {
                report: Box::new(report),
            }),
        }
    }

    /// PUBLISH, idempotent by run id. Never subject to a stage timeout or
    /// cancellation once started.
    async fn publish(
        &self,
        store: &EventStore,
        runner: &StageRunner<'_>,
        run: &mut PipelineRun,
    ) -> std::result::Result<Flow, PipelineError> {
        let key = publish_idempotency_key(run.id);

        match store.completed_publish(&key).await {
            Ok(Some(receipt)) => {
                info!(external_id = %receipt.external_id, "Publish already completed for this run");
                run.apply(StateDelta::Published(receipt));
                return Ok(Flow::Completed);
            }
            Ok(None) => {}
            Err(e) => {
                return Err(PipelineError::stage_failed(
                    Stage::Publish,
                    format!("cannot verify earlier publishes: {:#}", e),
                ))
            }
        }

        if run.request.dry_run {
            run.record(runner.skip(Stage::Publish, "dry run, publisher not called").await);
            return Ok(Flow::Completed);
        }

        let config = run.pipeline_state.config("publish");
        let draft = Arc::new(run.pipeline_state.final_draft());
        let metadata = Arc::new(PublishMetadata {
            run_id: run.id,
            idempotency_key: key.clone(),
            tenant_id: run.request.tenant_id.clone(),
            item_id: run.request.item_id.clone(),
            locale: run.request.locale.clone(),
            status: config.str("default_status").unwrap_or("draft").to_string(),
            overall_score: run.pipeline_state.report.as_ref().map(|r| r.overall_score),
        });

        let publisher = Arc::clone(&self.collaborators.publisher);
        let (result, record) = runner
            .run_retrying(
                Stage::Publish,
                None,
                stage_policy(Stage::Publish, &config),
                move |_| {
                    let publisher = Arc::clone(&publisher);
                    let draft = Arc::clone(&draft);
                    let metadata = Arc::clone(&metadata);
                    async move { publisher.publish(&draft, &metadata).await }
                },
            )
            .await;
        run.record(record);
        let receipt = result?;

        info!(external_id = %receipt.external_id, url = %receipt.url, "Published");
        log_event(
            store,
            Event::new(
                run.id,
                Some(Stage::Publish),
                EventType::PublishCompleted,
                key,
                format!("Published as {}", receipt.external_id),
                StageStatus::Completed,
            )
            .with_data(serde_json::to_value(&receipt).unwrap_or_default()),
        )
        .await;
        run.apply(StateDelta::Published(receipt));

        Ok(Flow::Completed)
    }

    /// HUMAN_REVIEW: open a ticket, then wait or park depending on the mode
    async fn escalate(
        &self,
        store: &EventStore,
        runner: &StageRunner<'_>,
        run: &mut PipelineRun,
    ) -> std::result::Result<Flow, PipelineError> {
        let state = &run.pipeline_state;
        let report = state
            .report
            .clone()
            .ok_or_else(|| PipelineError::stage_failed(Stage::HumanReview, "no compliance report"))?;
        let draft: DraftSections = state.draft.clone().unwrap_or_default();
        let subject = ReviewSubject {
            run_id: run.id,
            tenant_id: run.request.tenant_id.clone(),
            item_id: run.request.item_id.clone(),
            locale: run.request.locale.clone(),
        };

        let ticket = self
            .review
            .enqueue(subject, &draft, &report)
            .await
            .map_err(|e| PipelineError::stage_failed(Stage::HumanReview, e.to_string()))?;
        run.review_ticket = Some(ticket.id.clone());

        log_event(
            store,
            Event::new(
                run.id,
                Some(Stage::HumanReview),
                EventType::ReviewRequested,
                format!("{}:review:{}", run.id, ticket.id),
                format!("Review ticket {} opened", ticket.id),
                StageStatus::Pending,
            )
            .with_data(json!({ "ticket_id": ticket.id })),
        )
        .await;

        match self.settings.review_mode {
            ReviewMode::Asynchronous => {
                let checkpoint = RunCheckpoint::capture(run, &ticket.id);
                let (result, record) = runner
                    .run(Stage::HumanReview, None, async {
                        store.store_checkpoint(&checkpoint).await.map_err(|e| {
                            PipelineError::stage_failed(
                                Stage::HumanReview,
                                format!("failed to checkpoint run: {:#}", e),
                            )
                        })
                    })
                    .await;
                run.record(record);
                result?;
                Ok(Flow::Suspended {
                    ticket_id: ticket.id,
                })
            }
            ReviewMode::Synchronous => {
                let limit = self.settings.review_timeout();
                let gateway = match review_poll_interval(&run.pipeline_state.config("review")) {
                    Some(interval) => self.review.clone().with_poll_interval(interval),
                    None => self.review.clone(),
                };
                let (result, record) = runner
                    .run(Stage::HumanReview, None, async {
                        gateway
                            .wait_for_decision(&ticket.id, limit)
                            .await
                            .map_err(|e| match e {
                                ReviewError::TimedOut { waited_ms, .. } => {
                                    PipelineError::StageTimeout {
                                        stage: Stage::HumanReview,
                                        timeout_ms: waited_ms,
                                    }
                                }
                                other => PipelineError::stage_failed(
                                    Stage::HumanReview,
                                    other.to_string(),
                                ),
                            })
                    })
                    .await;
                run.record(record);
                let resolved = result?;
                log_event(store, review_resolved_event(run.id, &resolved)).await;

                match resolved.status {
                    TicketStatus::Approved => self.publish(store, runner, run).await,
                    _ => Err(PipelineError::ReviewRejected {
                        ticket_id: resolved.id,
                    }),
                }
            }
        }
    }

    /// Settle the run state, record metrics and append the terminal event
    async fn finish(
        &self,
        store: &EventStore,
        mut run: PipelineRun,
        outcome: std::result::Result<Flow, PipelineError>,
    ) -> Result<PipelineRun> {
        let key = format!("{}:complete", run.id);
        let terminal = match outcome {
            Ok(Flow::Completed) => {
                run.complete();
                info!(run_id = %run.id, "Run completed successfully");
                Event::new(
                    run.id,
                    None,
                    EventType::RunCompleted,
                    key,
                    "Run completed".to_string(),
                    StageStatus::Completed,
                )
            }
            Ok(Flow::Suspended { ticket_id }) => {
                info!(run_id = %run.id, %ticket_id, "Run awaiting human review");
                run.suspend(ticket_id.clone());
                Event::new(
                    run.id,
                    None,
                    EventType::RunSuspended,
                    format!("{}:suspend", run.id),
                    format!("Awaiting review ticket {}", ticket_id),
                    StageStatus::Pending,
                )
                .with_data(json!({ "ticket_id": ticket_id }))
            }
            Err(err) => {
                error!(run_id = %run.id, kind = ?err.kind(), error = %err, "Run aborted");
                if let Some(report) = err.report() {
                    run.apply(StateDelta::Report(report.clone()));
                }
                let message = err.to_string();
                run.abort(err);
                let failure = serde_json::to_value(&run.failure).unwrap_or_default();
                Event::new(
                    run.id,
                    None,
                    EventType::RunAborted,
                    key,
                    format!("Run aborted: {}", message),
                    StageStatus::Failed,
                )
                .with_error(message)
                .with_data(failure)
            }
        };

        // METRICS
        let runner = StageRunner::new(store, run.id);
        let summary = RunSummary::from_run(&run);
        let metrics = self.metrics.clone();
        let (_, record) = runner
            .run(Stage::Metrics, None, async move {
                metrics.record(summary);
                Ok::<_, PipelineError>(())
            })
            .await;
        run.record(record);

        store.append(&terminal).await?;
        Ok(run)
    }
}

/// Run one fan-out branch, rejecting keys it did not declare
async fn run_branch(
    runner: &StageRunner<'_>,
    stage: Stage,
    producer: Arc<dyn BranchProducer>,
    draft: Arc<DraftSections>,
    config: EffectiveConfig,
) -> BranchOutcome {
    let timeout = stage_timeout(stage, &config);
    let policy = stage_policy(stage, &config);
    let declared = Arc::new(producer.output_keys());
    let config = Arc::new(config);

    let (result, record) = runner
        .run_retrying(stage, timeout, policy, move |_| {
            let producer = Arc::clone(&producer);
            let draft = Arc::clone(&draft);
            let config = Arc::clone(&config);
            let declared = Arc::clone(&declared);
            async move {
                let delta = producer.produce(&draft, &config).await?;
                if let Some(key) = delta.keys().find(|k| !declared.contains(k)) {
                    return Err(StageError::Fatal(format!(
                        "branch '{}' returned undeclared key '{}'",
                        producer.name(),
                        key
                    )));
                }
                Ok(delta)
            }
        })
        .await;

    match result {
        Ok(delta) => Ok((delta, record)),
        Err(err) => Err((err, record)),
    }
}

/// Union of branch outputs; validated disjoint at build time
fn merge_branches(
    branches: &BTreeMap<String, BranchDelta>,
) -> std::result::Result<Map<String, Value>, PipelineError> {
    let mut merged = Map::new();
    for (branch, delta) in branches {
        for (key, value) in delta {
            if merged.insert(key.clone(), value.clone()).is_some() {
                return Err(PipelineError::stage_failed(
                    Stage::Merge,
                    format!("key '{}' written by more than one branch (last: {})", key, branch),
                ));
            }
        }
    }
    Ok(merged)
}

/// `review.poll_interval_ms` overrides the gateway's own polling cadence
fn review_poll_interval(config: &EffectiveConfig) -> Option<Duration> {
    config
        .get("poll_interval_ms")
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn stage_timeout(stage: Stage, config: &EffectiveConfig) -> Option<Duration> {
    config
        .get("timeout_ms")
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .or_else(|| default_timeout(stage))
}

fn stage_policy(stage: Stage, config: &EffectiveConfig) -> RetryPolicy {
    RetryPolicy::from_config(config, &default_retry_policy(stage))
}

fn review_resolved_event(run_id: Uuid, ticket: &ReviewTicket) -> Event {
    Event::new(
        run_id,
        Some(Stage::HumanReview),
        EventType::ReviewResolved,
        format!("{}:review:{}:resolved", run_id, ticket.id),
        format!("Review ticket {} {}", ticket.id, ticket.status.as_str()),
        StageStatus::Completed,
    )
    .with_data(json!({
        "ticket_id": ticket.id,
        "status": ticket.status.as_str(),
        "reviewer": ticket.reviewer,
    }))
}

/// Informational events never fail a run
async fn log_event(store: &EventStore, event: Event) {
    if let Err(e) = store.append(&event).await {
        warn!(error = %e, event_type = ?event.event_type, "Failed to append event");
    }
}
