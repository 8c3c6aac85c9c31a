//! Human review gateway.
//!
//! Tickets live in an append-only JSONL log (`review/tickets.jsonl`). Every
//! state change appends the full ticket; on replay the latest record for an
//! id wins. Reads and read-check-append sequences hold an `fs2` file lock so
//! concurrent reviewers cannot both resolve the same ticket.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    ComplianceReport, DraftSections, ReviewDecision, ReviewSubject, ReviewTicket, TicketStatus,
};

/// Default interval between ticket log polls while waiting synchronously
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review ticket not found: {0}")]
    NotFound(String),

    #[error("ticket {ticket_id} is already {from:?}; cannot move to {to:?}")]
    InvalidTransition {
        ticket_id: String,
        from: TicketStatus,
        to: TicketStatus,
    },

    #[error("timed out after {waited_ms}ms waiting for review of ticket {ticket_id}")]
    TimedOut { ticket_id: String, waited_ms: u64 },

    #[error("ticket log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ticket log is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ticket log task failed: {0}")]
    Task(String),
}

/// Persistent queue of review tickets
///
/// ```
/// use ccms::core::HumanReviewGateway;
/// use ccms::domain::TicketStatus;
///
/// # tokio_test::block_on(async {
/// let dir = std::env::temp_dir().join("ccms-doc-review");
/// let gateway = HumanReviewGateway::new(dir.join("no-tickets-yet.jsonl"));
///
/// let pending = gateway.list(Some(TicketStatus::Pending)).await.unwrap();
/// assert!(pending.is_empty());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct HumanReviewGateway {
    log_path: PathBuf,
    poll_interval: Duration,
}

impl HumanReviewGateway {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Open a pending ticket for a draft
    #[instrument(skip(self, draft, report), fields(run_id = %subject.run_id))]
    pub async fn enqueue(
        &self,
        subject: ReviewSubject,
        draft: &DraftSections,
        report: &ComplianceReport,
    ) -> Result<ReviewTicket, ReviewError> {
        let ticket = ReviewTicket {
            id: Uuid::new_v4().to_string(),
            run_id: subject.run_id,
            tenant_id: subject.tenant_id,
            item_id: subject.item_id,
            locale: subject.locale,
            status: TicketStatus::Pending,
            overall_score: report.overall_score,
            blocking_issues: report.blocking_issues.clone(),
            warnings: report.warnings.clone(),
            flagged_premium: report.flagged_premium,
            word_count: draft.word_count(),
            reviewer: None,
            note: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        let path = self.log_path.clone();
        let record = ticket.clone();
        self.blocking(move || {
            let mut file = open_locked(&path)?;
            append_ticket(&mut file, &record)
        })
        .await?;

        info!(ticket_id = %ticket.id, score = ticket.overall_score, "Review ticket opened");
        Ok(ticket)
    }

    /// Move a pending ticket to approved or rejected
    #[instrument(skip(self, note))]
    pub async fn resolve(
        &self,
        ticket_id: &str,
        decision: ReviewDecision,
        reviewer: Option<&str>,
        note: Option<&str>,
    ) -> Result<ReviewTicket, ReviewError> {
        let path = self.log_path.clone();
        let ticket_id = ticket_id.to_string();
        let reviewer = reviewer.map(String::from);
        let note = note.map(String::from);

        let ticket = self
            .blocking(move || {
                let mut file = open_locked(&path)?;
                let tickets = replay(&mut file)?;
                let mut ticket = tickets
                    .into_iter()
                    .find(|t| t.id == ticket_id)
                    .ok_or_else(|| ReviewError::NotFound(ticket_id.clone()))?;

                let target = decision.target_status();
                if ticket.status.is_terminal() {
                    return Err(ReviewError::InvalidTransition {
                        ticket_id,
                        from: ticket.status,
                        to: target,
                    });
                }

                ticket.status = target;
                ticket.reviewer = reviewer;
                ticket.note = note;
                ticket.resolved_at = Some(Utc::now());
                append_ticket(&mut file, &ticket)?;
                Ok(ticket)
            })
            .await?;

        info!(ticket_id = %ticket.id, status = ticket.status.as_str(), "Review ticket resolved");
        Ok(ticket)
    }

    pub async fn get(&self, ticket_id: &str) -> Result<Option<ReviewTicket>, ReviewError> {
        let tickets = self.list(None).await?;
        Ok(tickets.into_iter().find(|t| t.id == ticket_id))
    }

    /// Current tickets in creation order, optionally filtered by status
    pub async fn list(&self, status: Option<TicketStatus>) -> Result<Vec<ReviewTicket>, ReviewError> {
        let path = self.log_path.clone();
        let tickets = self
            .blocking(move || {
                if !path.exists() {
                    return Ok(Vec::new());
                }
                let mut file = File::open(&path)?;
                file.lock_shared()?;
                replay(&mut file)
            })
            .await?;

        Ok(tickets
            .into_iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect())
    }

    /// Poll until the ticket leaves `pending`; `None` waits indefinitely
    #[instrument(skip(self))]
    pub async fn wait_for_decision(
        &self,
        ticket_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ReviewTicket, ReviewError> {
        let started = Instant::now();

        loop {
            let ticket = self
                .get(ticket_id)
                .await?
                .ok_or_else(|| ReviewError::NotFound(ticket_id.to_string()))?;

            if ticket.status.is_terminal() {
                return Ok(ticket);
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(ReviewError::TimedOut {
                        ticket_id: ticket_id.to_string(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }

            debug!(ticket_id, "Ticket still pending");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, ReviewError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ReviewError> + Send + 'static,
    {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| ReviewError::Task(e.to_string()))?
    }
}

/// Open the log for read+append and take the exclusive lock.
/// The lock is released when the file is dropped.
fn open_locked(path: &Path) -> Result<File, ReviewError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

fn append_ticket(file: &mut File, ticket: &ReviewTicket) -> Result<(), ReviewError> {
    let json = serde_json::to_string(ticket)?;
    writeln!(file, "{}", json)?;
    file.flush()?;
    Ok(())
}

/// Fold the log into the latest record per ticket, in creation order
fn replay(file: &mut File) -> Result<Vec<ReviewTicket>, ReviewError> {
    file.seek(SeekFrom::Start(0))?;
    let reader = BufReader::new(&*file);

    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, ReviewTicket> = HashMap::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let ticket: ReviewTicket = serde_json::from_str(&line)?;
        if !latest.contains_key(&ticket.id) {
            order.push(ticket.id.clone());
        }
        latest.insert(ticket.id.clone(), ticket);
    }

    Ok(order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect())
}
