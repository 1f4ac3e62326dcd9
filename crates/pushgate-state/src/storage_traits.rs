//! Storage trait definitions for pushgate
//!
//! `RunLedger` is the durable, inspectable record of every pipeline run:
//! one run record with a terminal summary, plus the ordered events emitted
//! while the run executed.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata attached to a run at creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Commit that triggered the run
    pub commit: String,
    /// Branch whose push triggered the run
    pub source_branch: String,
    /// Branch that receives the change on success
    pub target_branch: String,
    /// When the triggering push happened
    pub triggered_at: DateTime<Utc>,
    /// Arbitrary key-value tags
    pub tags: serde_json::Value,
}

/// A single event in a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Event kind (e.g. "stage_changed", "step_started", "step_finished")
    pub kind: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// Terminal outcome of a run as stored in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Promoted,
    Blocked,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Promoted => "promoted",
            RunOutcome::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "promoted" => Some(RunOutcome::Promoted),
            "blocked" => Some(RunOutcome::Blocked),
            _ => None,
        }
    }
}

/// Summary produced when a run reaches a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total events recorded
    pub total_events: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Promoted or blocked
    pub outcome: RunOutcome,
    /// Serialized promotion record or failure report
    pub report: serde_json::Value,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Full run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Pipeline run ledger.
///
/// Guarantees:
/// - Events are ordered by monotonic `seq` within a run.
/// - A run transitions: Running → Completed | Failed (terminal).
/// - Terminal runs are immutable: appends and second finalisations fail.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Create a new run under the given ID. Fails if the ID is taken.
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()>;

    /// Append an event to an active run. Fails if the run is terminal.
    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()>;

    /// Mark a run as completed with a summary.
    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as failed with a summary.
    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all events for a run, ordered by seq.
    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>>;

    /// List runs newest first, optionally filtered by source branch.
    async fn list_runs(&self, source_branch: Option<&str>) -> StorageResult<Vec<RunRecord>>;
}
