//! Error types for pushgate-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the backing database.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::RunLedger`] implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No run with this ID exists.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A run with this ID was already created.
    #[error("run already exists: {run_id}")]
    DuplicateRun { run_id: String },

    /// The run is not in the state the operation requires.
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Stored data could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure (query, connection, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
