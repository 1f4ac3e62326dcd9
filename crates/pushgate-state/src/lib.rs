//! pushgate-state: run ledger persistence for pushgate
//!
//! Every pipeline run is recorded here, whether it was promoted or blocked
//! and whether or not its failure notification was delivered. The ledger is
//! the durable, inspectable result of each run.
//!
//! ## Key Components
//!
//! - `RunLedger`: async trait for run records and ordered run events
//! - `SurrealRunLedger`: SurrealDB implementation (`mem://`, `surrealkv://`, `ws://`)
//! - `fakes::MemoryRunLedger`: in-memory implementation for tests

mod error;
pub mod fakes;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_ledger;

pub use error::{StateError, StorageError};
pub use schema::{PipelineRunRow, RunCompletion, RunEventRow};
pub use storage_traits::{
    RunEvent, RunId, RunLedger, RunMetadata, RunOutcome, RunRecord, RunStatus, RunSummary,
    StorageResult,
};
pub use surreal_ledger::SurrealRunLedger;

/// Result type for pushgate-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
