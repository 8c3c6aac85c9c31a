//! Collaborator interfaces for external systems.
//!
//! The orchestrator only reaches the outside world through these traits:
//! the config store, the research store, the content generator, the two
//! branch producers (SEO and media) and the CMS publisher. Default
//! file/subprocess/HTTP implementations live in the submodules.

pub mod config_store;
pub mod fabric;
pub mod media;
pub mod research;
pub mod seo;
pub mod wordpress;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{ConfigLayers, EffectiveConfig};
use crate::domain::{
    BranchDelta, DraftSections, FinalDraft, PublishMetadata, PublishReceipt, ResearchRecord,
};

pub use config_store::FileConfigStore;
pub use fabric::FabricContentGenerator;
pub use media::MediaPlanProducer;
pub use research::FileResearchProvider;
pub use seo::TemplateSeoProducer;
pub use wordpress::WordPressPublisher;

/// Failure reported by a collaborator.
///
/// The retry executor retries `Retryable` failures and returns the others
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Transient: timeouts, rate limits, 5xx, connection failures
    #[error("retryable: {0}")]
    Retryable(String),

    /// Permanent: bad input, auth, parse failures
    #[error("fatal: {0}")]
    Fatal(String),

    /// The side effect may or may not have happened
    #[error("ambiguous: {0}")]
    Ambiguous(String),
}

impl StageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(m) | Self::Fatal(m) | Self::Ambiguous(m) => m,
        }
    }
}

/// Result type for collaborator calls
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Source of the three config layers
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Snapshot every layer that applies to (tenant, item)
    async fn load_layers(&self, tenant_id: &str, item_id: &str) -> StageResult<ConfigLayers>;
}

/// Structured research about an item
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn fetch(&self, item_id: &str, locale: &str) -> StageResult<ResearchRecord>;
}

/// Long-form draft generation
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        research: &ResearchRecord,
        config: &EffectiveConfig,
    ) -> StageResult<DraftSections>;
}

/// A stage that runs on the fan-out after CONTENT.
///
/// Each producer declares the keys it writes; the pipeline refuses to build
/// when two producers declare the same key.
#[async_trait]
pub trait BranchProducer: Send + Sync {
    /// Branch name, also the config chain it reads
    fn name(&self) -> &str;

    /// Keys this branch may write into the merged assets
    fn output_keys(&self) -> Vec<String>;

    async fn produce(
        &self,
        draft: &DraftSections,
        config: &EffectiveConfig,
    ) -> StageResult<BranchDelta>;
}

/// CMS publishing client
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish the draft. Calls with the same `metadata.idempotency_key` must
    /// not create a second external object.
    async fn publish(
        &self,
        draft: &FinalDraft,
        metadata: &PublishMetadata,
    ) -> StageResult<PublishReceipt>;
}

/// Classify an I/O failure: missing or malformed inputs are permanent,
/// everything else may succeed on retry.
pub(crate) fn classify_io(err: &std::io::Error, what: &str) -> StageError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidData => {
            StageError::Fatal(format!("{}: {}", what, err))
        }
        _ => StageError::Retryable(format!("{}: {}", what, err)),
    }
}
