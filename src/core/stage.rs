//! Execution of a single named stage.
//!
//! [`StageRunner`] wraps a stage's work with timing, the stage timeout,
//! optional retries, tracing and event-log entries, and returns a
//! [`StageRecord`] alongside the outcome.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::StageError;
use crate::domain::{Event, EventType, Stage, StageRecord, StageStatus};
use crate::errors::PipelineError;

use super::event_store::EventStore;
use super::retry::{RetryExecutor, RetryPolicy};

/// Runs stages for one pipeline run
pub struct StageRunner<'a> {
    store: &'a EventStore,
    run_id: Uuid,
}

impl<'a> StageRunner<'a> {
    pub fn new(store: &'a EventStore, run_id: Uuid) -> Self {
        Self { store, run_id }
    }

    /// Run in-memory work once, under an optional timeout
    pub async fn run<T, Fut>(
        &self,
        stage: Stage,
        timeout: Option<Duration>,
        work: Fut,
    ) -> (Result<T, PipelineError>, StageRecord)
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let attempts = AtomicU32::new(1);
        self.instrumented(stage, timeout, work, &attempts).await
    }

    /// Run a collaborator call under the retry policy; the timeout covers all attempts
    pub async fn run_retrying<T, F, Fut>(
        &self,
        stage: Stage,
        timeout: Option<Duration>,
        policy: RetryPolicy,
        mut operation: F,
    ) -> (Result<T, PipelineError>, StageRecord)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let attempts = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy);
        let counted = |attempt: u32| {
            attempts.store(attempt, Ordering::Relaxed);
            operation(attempt)
        };
        let work = async {
            executor
                .execute(stage.as_str(), counted)
                .await
                .map_err(|err| PipelineError::from_retry(stage, err))
        };
        self.instrumented(stage, timeout, work, &attempts).await
    }

    /// Record a stage that was deliberately not executed
    pub async fn skip(&self, stage: Stage, reason: &str) -> StageRecord {
        let now = Utc::now();
        info!(%stage, reason, "Stage skipped");
        self.log(
            Event::new(
                self.run_id,
                Some(stage),
                EventType::StageCompleted,
                format!("{}:{}", self.run_id, stage),
                format!("Stage '{}' skipped: {}", stage, reason),
                StageStatus::Skipped,
            )
            .with_duration(0)
            .with_data(json!({ "attempts": 0 })),
        )
        .await;

        StageRecord {
            stage,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            status: StageStatus::Skipped,
            attempts: 0,
            error: None,
        }
    }

    async fn instrumented<T, Fut>(
        &self,
        stage: Stage,
        timeout: Option<Duration>,
        work: Fut,
        attempts: &AtomicU32,
    ) -> (Result<T, PipelineError>, StageRecord)
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let key = format!("{}:{}", self.run_id, stage);
        let started_at = Utc::now();
        let clock = Instant::now();

        debug!(%stage, "Stage started");
        self.log(Event::new(
            self.run_id,
            Some(stage),
            EventType::StageStarted,
            key.clone(),
            format!("Stage '{}' started", stage),
            StageStatus::Running,
        ))
        .await;

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StageTimeout {
                    stage,
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => work.await,
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        let attempts = attempts.load(Ordering::Relaxed).max(1);
        let (status, error_text) = match &result {
            Ok(_) => (StageStatus::Completed, None),
            Err(err) => (StageStatus::Failed, Some(err.to_string())),
        };

        let record = StageRecord {
            stage,
            started_at,
            ended_at: Utc::now(),
            duration_ms,
            status,
            attempts,
            error: error_text.clone(),
        };

        let event = match &error_text {
            None => {
                info!(%stage, duration_ms, attempts, "Stage completed");
                Event::new(
                    self.run_id,
                    Some(stage),
                    EventType::StageCompleted,
                    key,
                    format!("Stage '{}' completed in {}ms", stage, duration_ms),
                    StageStatus::Completed,
                )
            }
            Some(message) => {
                error!(%stage, duration_ms, attempts, error = %message, "Stage failed");
                Event::new(
                    self.run_id,
                    Some(stage),
                    EventType::StageFailed,
                    key,
                    format!("Stage '{}' failed after {} attempt(s)", stage, attempts),
                    StageStatus::Failed,
                )
                .with_error(message.clone())
            }
        };
        self.log(
            event
                .with_duration(duration_ms)
                .with_data(json!({ "attempts": attempts })),
        )
        .await;

        (result, record)
    }

    /// Event log writes never fail a stage
    async fn log(&self, event: Event) {
        if let Err(e) = self.store.append(&event).await {
            warn!(error = %e, "Failed to append stage event");
        }
    }
}

/// Requests cancellation of a run
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the orchestrator at stage boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Err(Cancelled) if cancellation was requested before `stage`
    pub fn check(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            info!(%stage, "Run cancelled at stage boundary");
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Create a linked cancel handle and token
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}
