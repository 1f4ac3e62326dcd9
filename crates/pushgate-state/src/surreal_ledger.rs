//! SurrealDB-backed RunLedger implementation
//!
//! Uses `schema::PipelineRunRow` and `schema::RunEventRow` for persistence,
//! converting to/from `storage_traits` types at the boundary.

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{PipelineRunRow, RunCompletion, RunEventRow};
use crate::storage_traits::{
    RunEvent, RunId, RunLedger, RunMetadata, RunOutcome, RunRecord, RunStatus, RunSummary,
    StorageResult,
};

/// Environment variable naming the database endpoint.
pub const DB_URL_ENV: &str = "PUSHGATE_DB_URL";

/// Local persistence used when no endpoint is configured.
pub const DEFAULT_DB_URL: &str = "surrealkv://.pushgate/db";

/// SurrealDB-backed implementation of [`RunLedger`].
pub struct SurrealRunLedger {
    db: Surreal<Any>,
}

impl SurrealRunLedger {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `url` (`mem://`, `surrealkv://path`, `ws://host:port`),
    /// select `pushgate/main`, and run `init_schema`.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        if let Some(path) = Self::local_path(url) {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns("pushgate")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealRunLedger connected ({})", url);
        Ok(Self { db })
    }

    /// Connect using `PUSHGATE_DB_URL`, falling back to local persistence in
    /// `.pushgate/db`.
    pub async fn from_env() -> crate::Result<Self> {
        Self::connect(&Self::url_from_env()).await
    }

    /// `PUSHGATE_DB_URL`, or the default local store.
    pub fn url_from_env() -> String {
        std::env::var(DB_URL_ENV).unwrap_or_else(|_| DEFAULT_DB_URL.to_string())
    }

    /// Directory of an on-disk (`surrealkv://`) ledger; `None` for remote or
    /// in-memory ledgers.
    pub fn local_path(url: &str) -> Option<&std::path::Path> {
        url.strip_prefix("surrealkv://").map(std::path::Path::new)
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_run(&self, rid: &str) -> StorageResult<PipelineRunRow> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM pipeline_runs WHERE run_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<PipelineRunRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: rid.to_string(),
            })
    }

    async fn fetch_running(&self, rid: &str) -> StorageResult<PipelineRunRow> {
        let row = self.fetch_run(rid).await?;
        if row.status != RunStatus::Running.as_str() {
            return Err(StorageError::InvalidRunState {
                run_id: rid.to_string(),
                status: row.status,
                expected: "Running".to_string(),
            });
        }
        Ok(row)
    }

    async fn finish(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: RunSummary,
    ) -> StorageResult<()> {
        self.fetch_running(&run_id.0).await?;

        let completion = RunCompletion {
            status: status.as_str().to_string(),
            total_events: summary.total_events,
            duration_ms: summary.duration_ms,
            outcome: Some(summary.outcome.as_str().to_string()),
            report: summary.report,
            completed_at: Some(Utc::now()),
        };
        let rid_owned = run_id.0.clone();

        self.db
            .query("UPDATE pipeline_runs MERGE $patch WHERE run_id = $rid")
            .bind(("patch", completion))
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    fn row_to_record(row: PipelineRunRow) -> StorageResult<RunRecord> {
        let status = match row.status.as_str() {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            other => {
                return Err(StorageError::Backend(format!(
                    "unknown run status: {other}"
                )))
            }
        };

        let summary = match (status, row.outcome.as_deref()) {
            (RunStatus::Running, _) => None,
            (_, Some(outcome)) => {
                let outcome = RunOutcome::parse(outcome).ok_or_else(|| {
                    StorageError::Backend(format!("unknown run outcome: {outcome}"))
                })?;
                Some(RunSummary {
                    total_events: row.total_events,
                    duration_ms: row.duration_ms,
                    outcome,
                    report: row.report,
                })
            }
            (_, None) => {
                return Err(StorageError::Backend(format!(
                    "terminal run {} has no outcome",
                    row.run_id
                )))
            }
        };

        Ok(RunRecord {
            run_id: RunId(row.run_id),
            metadata: RunMetadata {
                commit: row.commit,
                source_branch: row.source_branch,
                target_branch: row.target_branch,
                triggered_at: row.triggered_at,
                tags: row.tags,
            },
            status,
            summary,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }

    fn row_to_event(row: RunEventRow) -> RunEvent {
        RunEvent {
            seq: row.seq,
            kind: row.kind,
            payload: row.payload,
            timestamp: row.timestamp,
        }
    }
}

#[async_trait]
impl RunLedger for SurrealRunLedger {
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()> {
        match self.fetch_run(&run_id.0).await {
            Ok(_) => {
                return Err(StorageError::DuplicateRun {
                    run_id: run_id.0.clone(),
                })
            }
            Err(StorageError::RunNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let row = PipelineRunRow::new(
            run_id.0.clone(),
            metadata.commit,
            metadata.source_branch,
            metadata.target_branch,
            metadata.triggered_at,
            metadata.tags,
        );

        debug!(run_id = %run_id, "creating run");

        let _created: Option<PipelineRunRow> = self
            .db
            .create("pipeline_runs")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        self.fetch_running(&run_id.0).await?;

        let row = RunEventRow::new(
            run_id.0.clone(),
            event.seq,
            event.kind,
            event.payload,
            event.timestamp,
        );

        let _created: Option<RunEventRow> = self
            .db
            .create("run_events")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Completed, summary).await
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Failed, summary).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let row = self.fetch_run(&run_id.0).await?;
        Self::row_to_record(row)
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        self.fetch_run(&run_id.0).await?;

        let rid_owned = run_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM run_events WHERE run_id = $rid ORDER BY seq ASC")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<RunEventRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(Self::row_to_event).collect())
    }

    async fn list_runs(&self, source_branch: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let rows: Vec<PipelineRunRow> = if let Some(branch) = source_branch {
            let branch_owned = branch.to_string();
            let mut res = self
                .db
                .query(
                    "SELECT * FROM pipeline_runs WHERE source_branch = $branch ORDER BY created_at DESC",
                )
                .bind(("branch", branch_owned))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM pipeline_runs ORDER BY created_at DESC")
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
