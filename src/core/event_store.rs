//! Append-only event store with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection. A run parked on human review also keeps
//! a `checkpoint.json` next to its event log.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType, PublishReceipt, RunCheckpoint};

/// File-based event store using JSONL format
pub struct EventStore {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Path to the review checkpoint
    checkpoint_path: PathBuf,
}

impl EventStore {
    /// Create or open an event store for a run under `base_dir`
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        Ok(Self {
            events_path: run_dir.join("events.jsonl"),
            checkpoint_path: run_dir.join("checkpoint.json"),
            run_dir,
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Receipt of an earlier publish with this idempotency key, if any
    pub async fn completed_publish(&self, idempotency_key: &str) -> Result<Option<PublishReceipt>> {
        let events = self.replay().await?;

        let receipt = events
            .into_iter()
            .rev()
            .find(|e| {
                e.idempotency_key == idempotency_key
                    && matches!(e.event_type, EventType::PublishCompleted)
            })
            .and_then(|e| e.data)
            .map(serde_json::from_value::<PublishReceipt>)
            .transpose()
            .context("Failed to parse publish receipt")?;

        Ok(receipt)
    }

    /// Persist the state needed to resume after review
    pub async fn store_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<PathBuf> {
        let json =
            serde_json::to_string_pretty(checkpoint).context("Failed to serialize checkpoint")?;

        fs::write(&self.checkpoint_path, json)
            .await
            .with_context(|| {
                format!("Failed to write checkpoint: {}", self.checkpoint_path.display())
            })?;

        Ok(self.checkpoint_path.clone())
    }

    pub async fn load_checkpoint(&self) -> Result<Option<RunCheckpoint>> {
        if !self.checkpoint_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.checkpoint_path)
            .await
            .with_context(|| {
                format!("Failed to read checkpoint: {}", self.checkpoint_path.display())
            })?;

        let checkpoint = serde_json::from_str(&content).context("Failed to parse checkpoint")?;
        Ok(Some(checkpoint))
    }

    /// List all run IDs under `base_dir`
    pub async fn list_runs_in(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Generate an idempotency key for a stage
pub fn generate_idempotency_key(run_id: Uuid, stage: &str, input: &str) -> String {
    let input_hash = hash_input(input);
    format!("{}:{}:{}", run_id, stage, input_hash)
}

/// Publish key: stable for the lifetime of a run, including resumes
pub fn publish_idempotency_key(run_id: Uuid) -> String {
    generate_idempotency_key(run_id, "publish", &run_id.to_string())
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
