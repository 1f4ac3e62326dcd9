//! SurrealDB schema migrations and initialization
//!
//! Sets up the run ledger tables with their uniqueness constraints and
//! indexes.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all pushgate tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing pushgate SurrealDB schema");

    init_pipeline_runs_table(db).await?;
    init_run_events_table(db).await?;

    info!("pushgate schema initialization complete");
    Ok(())
}

/// Initialize `pipeline_runs` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE pipeline_runs {
///   run_id:        STRING (unique)
///   commit:        STRING (indexed)
///   source_branch: STRING (indexed)
///   target_branch: STRING
///   triggered_at:  DATETIME
///   tags:          OBJECT
///   status:        STRING (running | completed | failed)
///   total_events:  INT
///   duration_ms:   INT
///   outcome:       STRING? (promoted | blocked)
///   report:        OBJECT
///   created_at:    DATETIME (indexed)
///   completed_at:  DATETIME?
/// }
/// ```
///
/// `status` transitions running → completed | failed are enforced by the
/// ledger; terminal rows are never updated again.
async fn init_pipeline_runs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing pipeline_runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS pipeline_runs
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE pipeline_runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_commit ON TABLE pipeline_runs COLUMNS commit;
        DEFINE INDEX IF NOT EXISTS idx_source_branch ON TABLE pipeline_runs COLUMNS source_branch;
        DEFINE INDEX IF NOT EXISTS idx_created_at ON TABLE pipeline_runs COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("pipeline_runs table initialized");
    Ok(())
}

/// Initialize `run_events` table with constraints and indexes
///
/// `(run_id, seq)` is unique: no duplicate sequence numbers within a run.
async fn init_run_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing run_events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS run_events
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_id_seq ON TABLE run_events COLUMNS run_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_event_run_id ON TABLE run_events COLUMNS run_id;
        DEFINE INDEX IF NOT EXISTS idx_kind ON TABLE run_events COLUMNS kind;
    "#;

    db.query(sql).await?.check()?;
    info!("run_events table initialized");
    Ok(())
}
