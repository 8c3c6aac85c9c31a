//! Error taxonomy for pipeline runs.
//!
//! Every variant of [`PipelineError`] aborts a run with a structured reason.
//! Configuration problems are not errors: they surface as
//! [`crate::core::ConfigResolutionWarning`]s on the effective config.

use thiserror::Error;

use crate::adapters::StageError;
use crate::core::RetryError;
use crate::domain::{ComplianceReport, FailureKind, Stage};

/// Why a run was aborted
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("insufficient research data: {found} populated fields, {required} required")]
    InsufficientData { found: usize, required: usize },

    #[error("stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout { stage: Stage, timeout_ms: u64 },

    #[error("stage '{stage}' failed after {attempts} attempts: {last}")]
    RetryExhausted {
        stage: Stage,
        attempts: u32,
        last: StageError,
    },

    #[error("stage '{stage}' failed: {error}")]
    StageFailed { stage: Stage, error: StageError },

    #[error("compliance gate blocked publication: {}", .report.summary())]
    ComplianceBlocking { report: Box<ComplianceReport> },

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("review ticket {ticket_id} was rejected")]
    ReviewRejected { ticket_id: String },

    #[error("run cancelled before stage '{stage}'")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::InsufficientData { .. } => FailureKind::InsufficientData,
            Self::StageTimeout { .. } => FailureKind::StageTimeout,
            Self::RetryExhausted { .. } => FailureKind::RetryExhausted,
            Self::StageFailed { .. } => FailureKind::StageFailed,
            Self::ComplianceBlocking { .. } => FailureKind::ComplianceBlocking,
            Self::Publish(_) => FailureKind::Publish,
            Self::ReviewRejected { .. } => FailureKind::ReviewRejected,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Map a retry outcome for `stage` into the run taxonomy.
    ///
    /// Publish failures keep the published / not-published distinction.
    pub fn from_retry(stage: Stage, err: RetryError) -> Self {
        match (stage, err) {
            (stage, RetryError::Exhausted { attempts, last }) => Self::RetryExhausted {
                stage,
                attempts,
                last,
            },
            (Stage::Publish, RetryError::Fatal { error, .. }) => match error {
                StageError::Ambiguous(message) => Self::Publish(PublishError::Ambiguous(message)),
                other => Self::Publish(PublishError::NotPublished(other.to_string())),
            },
            (stage, RetryError::Fatal { error, .. }) => Self::StageFailed { stage, error },
        }
    }

    pub fn stage_failed(stage: Stage, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            error: StageError::Fatal(message.into()),
        }
    }

    /// The compliance report, when the run was blocked by the gate
    pub fn report(&self) -> Option<&ComplianceReport> {
        match self {
            Self::ComplianceBlocking { report } => Some(report),
            _ => None,
        }
    }
}

/// Publisher failure, split by whether the content may exist externally
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The publisher definitely did not create the content
    #[error("publish failed, nothing was published: {0}")]
    NotPublished(String),

    /// The publisher may have created the content; the external id is unknown
    #[error("publish outcome unknown, content may exist externally: {0}")]
    Ambiguous(String),
}

/// Problems detected while assembling a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineBuildError {
    #[error("branches '{first}' and '{second}' both declare output key '{key}'")]
    KeyCollision {
        key: String,
        first: String,
        second: String,
    },

    #[error("branch '{branch}' declares reserved output key '{key}'")]
    ReservedKey { branch: String, key: String },

    #[error("branch '{0}' declares no output keys")]
    EmptyBranch(String),

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}
