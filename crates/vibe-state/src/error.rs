//! Error types for vibe-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No run with this id exists.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// The run is not in a state that permits the requested transition.
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// A step record exists but could not be decoded or has an invalid digest.
    #[error("step {step_id} of run {run_id} is corrupt: {reason}")]
    CorruptStep {
        run_id: String,
        step_id: String,
        reason: String,
    },

    /// A digest string is not 64 lowercase hex chars.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Serialization of a stored value failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend (database) failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
