//! Per-run metrics, persisted to SQLite off the run's critical path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{PipelineRun, RunState, StageTiming};

/// The row written for every finished (or parked) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub item_id: String,
    pub locale: String,
    /// published | dry_run | awaiting_review | aborted
    pub outcome: String,
    pub success: bool,
    pub failure_kind: Option<String>,
    pub overall_score: Option<f64>,
    pub blocking_issues: usize,
    pub total_duration_ms: u64,
    pub stage_timings: Vec<StageTiming>,
    pub recorded_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_run(run: &PipelineRun) -> Self {
        let outcome = match &run.state {
            RunState::Completed if run.request.dry_run => "dry_run",
            RunState::Completed => "published",
            RunState::AwaitingReview { .. } => "awaiting_review",
            RunState::Aborted { .. } => "aborted",
            RunState::Running => "running",
        };
        let report = run.pipeline_state.report.as_ref();

        Self {
            run_id: run.id,
            tenant_id: run.request.tenant_id.clone(),
            item_id: run.request.item_id.clone(),
            locale: run.request.locale.clone(),
            outcome: outcome.to_string(),
            success: matches!(run.state, RunState::Completed),
            failure_kind: run
                .failure
                .as_ref()
                .and_then(|f| serde_json::to_value(f.kind).ok())
                .and_then(|v| v.as_str().map(String::from)),
            overall_score: report.map(|r| r.overall_score),
            blocking_issues: report.map(|r| r.blocking_issues.len()).unwrap_or(0),
            total_duration_ms: run.total_duration_ms(),
            stage_timings: run.stages.iter().map(|s| s.timing()).collect(),
            recorded_at: Utc::now(),
        }
    }
}

/// Destination for run summaries
pub trait MetricsStore: Send + Sync + 'static {
    fn write(&self, summary: &RunSummary) -> Result<()>;
}

/// SQLite-backed store (one row per run)
#[derive(Debug, Clone)]
pub struct SqliteMetricsStore {
    path: PathBuf,
}

impl SqliteMetricsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create metrics directory: {}", parent.display()))?;
        }
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open metrics db: {}", self.path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_metrics (
                run_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                locale TEXT NOT NULL,
                outcome TEXT NOT NULL,
                success INTEGER NOT NULL,
                failure_kind TEXT,
                overall_score REAL,
                blocking_issues INTEGER NOT NULL,
                total_duration_ms INTEGER NOT NULL,
                stage_timings TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_metrics_tenant ON run_metrics (tenant_id, recorded_at);",
        )
        .context("Failed to create metrics schema")?;
        Ok(conn)
    }

    /// Most recent summaries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, tenant_id, item_id, locale, outcome, success, failure_kind,
                    overall_score, blocking_issues, total_duration_ms, stage_timings, recorded_at
             FROM run_metrics ORDER BY recorded_at DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (run_id, tenant_id, item_id, locale, outcome, success, failure_kind, overall_score, blocking, duration, timings, recorded) =
                row?;
            summaries.push(RunSummary {
                run_id: Uuid::parse_str(&run_id).context("Invalid run id in metrics db")?,
                tenant_id,
                item_id,
                locale,
                outcome,
                success,
                failure_kind,
                overall_score,
                blocking_issues: blocking.max(0) as usize,
                total_duration_ms: duration.max(0) as u64,
                stage_timings: serde_json::from_str(&timings)
                    .context("Invalid stage timings in metrics db")?,
                recorded_at: DateTime::parse_from_rfc3339(&recorded)
                    .context("Invalid timestamp in metrics db")?
                    .with_timezone(&Utc),
            });
        }

        Ok(summaries)
    }
}

impl MetricsStore for SqliteMetricsStore {
    fn write(&self, summary: &RunSummary) -> Result<()> {
        let conn = self.connect()?;
        let timings =
            serde_json::to_string(&summary.stage_timings).context("Failed to serialize timings")?;

        conn.execute(
            "INSERT OR REPLACE INTO run_metrics (
                run_id, tenant_id, item_id, locale, outcome, success, failure_kind,
                overall_score, blocking_issues, total_duration_ms, stage_timings, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                summary.run_id.to_string(),
                summary.tenant_id,
                summary.item_id,
                summary.locale,
                summary.outcome,
                summary.success,
                summary.failure_kind,
                summary.overall_score,
                summary.blocking_issues as i64,
                summary.total_duration_ms as i64,
                timings,
                summary.recorded_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert run metrics")?;

        Ok(())
    }
}

/// Fire-and-forget recorder: writes happen on a blocking task and failures
/// are only logged. [`MetricsRecorder::flush`] waits for writes still in
/// flight, for callers about to exit the process.
#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn MetricsStore>,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(SqliteMetricsStore::new(path)))
    }

    /// Schedule the write and return immediately. Awaiting the handle is optional.
    pub fn record(&self, summary: RunSummary) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let drained = Arc::clone(&self.drained);
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::task::spawn_blocking(move || {
            match store.write(&summary) {
                Ok(()) => debug!(run_id = %summary.run_id, outcome = %summary.outcome, "Run metrics recorded"),
                Err(e) => warn!(run_id = %summary.run_id, error = %e, "Failed to record run metrics"),
            }
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        })
    }

    /// Number of writes scheduled but not yet finished
    pub fn pending(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every scheduled write has finished, up to `limit`.
    /// Returns false if writes were still pending when the limit passed.
    pub async fn flush(&self, limit: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.drained.notified();
                if self.pending() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(limit, drained).await {
            Ok(()) => true,
            Err(_) => {
                warn!(pending = self.pending(), "Timed out waiting for metrics writes");
                false
            }
        }
    }
}
