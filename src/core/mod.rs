//! Core orchestration logic.
//!
//! This module contains:
//! - ConfigResolver: Three-layer config resolution per chain
//! - EventStore: Append-only event logging
//! - Retry/Stage: Backoff policy and per-stage instrumentation
//! - Compliance: The four-validator quality gate
//! - Review: Human review tickets
//! - Metrics: Per-run SQLite summaries
//! - Orchestrator: Main execution engine

pub mod compliance;
pub mod config_resolver;
pub mod event_store;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod review;
pub mod stage;

// Re-export commonly used types
pub use compliance::{ComplianceGate, ComplianceInput, Validator, ValidatorError};
pub use config_resolver::{
    ConfigLayer, ConfigLayers, ConfigResolutionWarning, ConfigResolver, EffectiveConfig, LayerKind,
    STANDARD_CHAINS,
};
pub use event_store::{generate_idempotency_key, hash_input, publish_idempotency_key, EventStore};
pub use metrics::{MetricsRecorder, MetricsStore, RunSummary, SqliteMetricsStore};
pub use orchestrator::PipelineOrchestrator;
pub use pipeline::{Environment, PipelineBuilder, PipelineSettings, ReviewMode};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use review::{HumanReviewGateway, ReviewError};
pub use stage::{cancellation, CancelHandle, CancelToken, StageRunner};
