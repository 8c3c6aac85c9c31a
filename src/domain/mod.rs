//! Domain types for the ccms orchestrator.
//!
//! This module contains the core data structures:
//! - Events: Immutable records of stage transitions
//! - Run: Pipeline run state, requests and results
//! - State: The per-stage immutable pipeline state
//! - Content: Research records, drafts and publish receipts
//! - Report: Validation results and the compliance report
//! - Ticket: Human review tickets
//! - Tenant: Tenant configuration and voice profile

pub mod content;
pub mod events;
pub mod report;
pub mod run;
pub mod state;
pub mod tenant;
pub mod ticket;

// Re-export commonly used types
pub use content::{BranchDelta, DraftSections, FinalDraft, PublishMetadata, PublishReceipt, ResearchRecord};
pub use events::{Event, EventType, Stage, StageStatus};
pub use report::{
    ComplianceReport, ComplianceWeights, GateDecision, QualityBand, Thresholds, ValidationResult,
    ValidatorCategory,
};
pub use run::{
    FailureKind, FailureReason, PipelineResult, PipelineRun, RunCheckpoint, RunRequest, RunState,
    StageRecord, StageTiming,
};
pub use state::{PipelineState, StateDelta};
pub use tenant::{TenantConfig, VoiceProfile};
pub use ticket::{ReviewDecision, ReviewSubject, ReviewTicket, TicketStatus};
