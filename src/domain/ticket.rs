//! Human review tickets.
//!
//! Tickets follow `pending -> approved | rejected`. The ticket log is
//! append-only; the latest record for an id wins on replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Approved,
    Rejected,
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

/// A reviewer's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn target_status(&self) -> TicketStatus {
        match self {
            Self::Approve => TicketStatus::Approved,
            Self::Reject => TicketStatus::Rejected,
        }
    }
}

/// What a ticket is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubject {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub item_id: String,
    pub locale: String,
}

/// A human review request for one draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewTicket {
    pub id: String,
    pub run_id: Uuid,
    pub tenant_id: String,
    pub item_id: String,
    pub locale: String,
    pub status: TicketStatus,

    /// Compliance summary at enqueue time
    pub overall_score: f64,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub flagged_premium: bool,
    pub word_count: usize,

    pub reviewer: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReviewTicket {
    pub fn is_pending(&self) -> bool {
        self.status == TicketStatus::Pending
    }
}
