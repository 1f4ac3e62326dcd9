//! Schema definitions for pushgate SurrealDB tables
//!
//! Tables:
//! - pipeline_runs: One row per pipeline run (metadata + terminal summary)
//! - run_events: Ordered events emitted while a run executed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Pipeline run row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Unique run ID (UUID string)
    pub run_id: String,
    /// Triggering commit
    pub commit: String,
    /// Source branch
    pub source_branch: String,
    /// Target branch
    pub target_branch: String,
    /// When the triggering push happened
    #[serde(with = "surreal_datetime")]
    pub triggered_at: DateTime<Utc>,
    /// Arbitrary tags (JSON)
    #[serde(default)]
    pub tags: serde_json::Value,
    /// Run status: "running" | "completed" | "failed"
    pub status: String,
    /// Total events recorded
    pub total_events: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// "promoted" | "blocked" once terminal
    pub outcome: Option<String>,
    /// Serialized promotion record or failure report, null while running
    #[serde(default)]
    pub report: serde_json::Value,
    /// Created timestamp
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    /// Completed timestamp (if terminal)
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRunRow {
    /// Create a new run row in "running" state
    pub fn new(
        run_id: String,
        commit: String,
        source_branch: String,
        target_branch: String,
        triggered_at: DateTime<Utc>,
        tags: serde_json::Value,
    ) -> Self {
        PipelineRunRow {
            id: None,
            run_id,
            commit,
            source_branch,
            target_branch,
            triggered_at,
            tags,
            status: "running".to_string(),
            total_events: 0,
            duration_ms: 0,
            outcome: None,
            report: serde_json::Value::Null,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Fields merged into a run row when it reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletion {
    /// "completed" | "failed"
    pub status: String,
    pub total_events: u64,
    pub duration_ms: u64,
    pub outcome: Option<String>,
    pub report: serde_json::Value,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Run event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Run ID this event belongs to
    pub run_id: String,
    /// Monotonic sequence number within run (1-indexed)
    pub seq: u64,
    /// Event kind (e.g. "stage_changed", "step_finished")
    pub kind: String,
    /// Event payload (JSON)
    pub payload: serde_json::Value,
    /// Event timestamp
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl RunEventRow {
    /// Create a new run event row
    pub fn new(
        run_id: String,
        seq: u64,
        kind: String,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        RunEventRow {
            id: None,
            run_id,
            seq,
            kind,
            payload,
            timestamp,
        }
    }
}
