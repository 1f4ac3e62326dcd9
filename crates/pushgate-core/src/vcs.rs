//! Version-control capability used by the pipeline stages.
//!
//! The pipeline never shells out to git directly; it goes through
//! [`VersionControl`] so the stages can be exercised against the in-memory
//! fake in `fakes::MemoryVcs`.

use async_trait::async_trait;

use crate::domain::{CommitRef, MergeKind};

/// Errors from version-control operations.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("git operation timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of merging the validated commit into the target tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new target tip exists locally and is ready to push.
    Merged { new_ref: CommitRef, kind: MergeKind },
    /// The merge could not be completed automatically.
    Conflict { paths: Vec<String> },
}

/// Result of pushing a new target tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote refused the update (typically the target moved).
    Rejected { reason: String },
}

/// Capability interface over a repository and its remote.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Fetch `branch` from the remote and return its current tip.
    async fn fetch(&self, branch: &str) -> Result<CommitRef, VcsError>;

    /// Materialize `commit` in the working tree.
    async fn checkout(&self, commit: &CommitRef) -> Result<(), VcsError>;

    /// Merge `source` into the tip `target`, producing a candidate new tip.
    async fn merge(
        &self,
        target: &CommitRef,
        source: &CommitRef,
        message: &str,
    ) -> Result<MergeOutcome, VcsError>;

    /// Update remote `branch` to `new_ref`. Only fast-forward updates succeed.
    async fn push(&self, branch: &str, new_ref: &CommitRef) -> Result<PushOutcome, VcsError>;

    /// Paths changed between two commits. Implementations that cannot answer
    /// cheaply return an empty list.
    async fn changed_paths(
        &self,
        _from: &CommitRef,
        _to: &CommitRef,
    ) -> Result<Vec<String>, VcsError> {
        Ok(Vec::new())
    }
}
