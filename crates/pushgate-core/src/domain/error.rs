//! Domain-level error taxonomy for pushgate.

use super::run::RunStage;

/// pushgate domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PushgateError {
    #[error("cannot {action} while run is {stage}")]
    InvalidTransition {
        stage: RunStage,
        action: &'static str,
    },

    #[error("promoted commit {promoted} is not the validated commit {validated}")]
    CommitMismatch { validated: String, promoted: String },

    #[error("vcs error: {0}")]
    Vcs(#[from] crate::vcs::VcsError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] pushgate_state::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pushgate domain operations.
pub type Result<T> = std::result::Result<T, PushgateError>;
