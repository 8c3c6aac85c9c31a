//! Event types for the run log.
//!
//! Every stage transition of a run is recorded as an immutable event in an
//! append-only log. Run status is reconstructed by replaying these events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in the append-only run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Stage this event belongs to (None for run-level events)
    pub stage: Option<Stage>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{run_id}:{stage}:{input_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (NO secrets, NO draft text)
    pub payload_summary: String,

    /// Status of the stage/run after this event
    pub status: StageStatus,

    /// Time taken in milliseconds (for finished stages)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Structured payload (request, receipt, ticket id, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        stage: Option<Stage>,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
        status: StageStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage,
            event_type,
            idempotency_key,
            payload_summary,
            status,
            duration_ms: None,
            error: None,
            data: None,
        }
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach a structured payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new run has started (data: the request)
    RunStarted,

    /// A stage has started execution
    StageStarted,

    /// A stage completed successfully
    StageCompleted,

    /// A stage failed
    StageFailed,

    /// The compliance gate produced a report (data: score summary)
    ComplianceEvaluated,

    /// A review ticket was opened (data: ticket id)
    ReviewRequested,

    /// A review ticket reached a terminal state
    ReviewResolved,

    /// The publisher confirmed a publish (data: receipt)
    PublishCompleted,

    /// The run finished successfully
    RunCompleted,

    /// The run was aborted (data: failure kind)
    RunAborted,

    /// The run was checkpointed while waiting for review (data: ticket id)
    RunSuspended,
}

/// Status of a stage or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet started
    #[default]
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped (dry run, idempotent replay)
    Skipped,
}

/// Named pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Research,
    Content,
    Seo,
    Media,
    Merge,
    Comply,
    Publish,
    HumanReview,
    Metrics,
}

impl Stage {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Research => "research",
            Self::Content => "content",
            Self::Seo => "seo",
            Self::Media => "media",
            Self::Merge => "merge",
            Self::Comply => "comply",
            Self::Publish => "publish",
            Self::HumanReview => "human_review",
            Self::Metrics => "metrics",
        }
    }

    /// Config chain this stage reads its effective config from
    pub fn chain(&self) -> Option<&'static str> {
        match self {
            Self::Research => Some("research"),
            Self::Content => Some("content"),
            Self::Seo => Some("seo"),
            Self::Media => Some("media"),
            Self::Comply => Some("compliance"),
            Self::Publish => Some("publish"),
            Self::HumanReview => Some("review"),
            Self::Config | Self::Merge | Self::Metrics => None,
        }
    }

    /// Whether the stage talks to an external collaborator (and is retried)
    pub fn performs_io(&self) -> bool {
        matches!(
            self,
            Self::Config | Self::Research | Self::Content | Self::Seo | Self::Media | Self::Publish
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
