//! ccms - Multi-tenant casino review pipeline orchestrator
//!
//! Turns a (tenant, item, locale) request into a published review by
//! running a fixed stage table against pluggable collaborators, gating
//! publication on a weighted compliance score.
//!
//! # Architecture
//!
//! - Configuration resolves per chain from three layers: global defaults,
//!   tenant defaults, tenant+item overrides
//! - Every stage transition is appended to a per-run JSONL event log;
//!   status and listing replay those logs
//! - SEO and media run concurrently and must write disjoint keys
//! - Low-scoring drafts escalate to human review tickets; runs parked on
//!   review resume from a checkpoint once the ticket is resolved
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits and default implementations
//! - `core`: Orchestration logic (resolver, retry, compliance, review, metrics)
//! - `domain`: Data structures (Event, PipelineRun, ComplianceReport)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline
//! ccms run --tenant acme --item casino-x --locale en-GB
//!
//! # Check run status
//! ccms status <run-id>
//!
//! # Approve a review ticket and resume the parked run
//! ccms review approve <ticket-id> --reviewer sam
//! ccms resume <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod errors;

// Re-export main types at crate root for convenience
pub use core::{ComplianceGate, ConfigResolver, HumanReviewGateway, PipelineOrchestrator};
pub use domain::{ComplianceReport, Event, EventType, PipelineResult, PipelineRun, RunRequest, RunState};
pub use errors::{PipelineBuildError, PipelineError};
