//! Trigger inputs: push events, commit references, branch pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque commit identifier, compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitRef(String);

impl CommitRef {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 chars), for messages.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The (source, target) branch pair a run promotes between.
///
/// At most one run per pair is active at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchPair {
    pub source: String,
    pub target: String,
}

impl BranchPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl std::fmt::Display for BranchPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// A push observed on some branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Branch that received the push.
    pub branch: String,

    /// Commit now at the tip of `branch`.
    pub commit: CommitRef,

    /// When the push happened.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn new(branch: impl Into<String>, commit: impl Into<CommitRef>) -> Self {
        Self {
            branch: branch.into(),
            commit: commit.into(),
            timestamp: Utc::now(),
        }
    }

    /// Events with an empty branch or commit never match anything.
    pub fn is_well_formed(&self) -> bool {
        !self.branch.trim().is_empty() && !self.commit.is_empty()
    }
}
