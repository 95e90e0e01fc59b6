//! vibe-state: durable state for vibe runs
//!
//! This crate owns everything a run must not lose when a worker restarts:
//! memoized step results, the run lifecycle, and the single persisted
//! outcome of each run.
//!
//! ## Key Components
//!
//! - `StepLedger`: insert-if-absent memo table keyed by (run id, step id)
//! - `RunStore`: PENDING → RUNNING → SUCCEEDED | FAILED
//! - `OutcomeStore`: at most one outcome per run
//! - `SurrealLedger`: SurrealDB backend implementing all three
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_ledger;

pub use error::{StateError, StorageError};
pub use storage_traits::{
    ContentDigest, Fragment, MessageRole, NewOutcome, NewRun, OutcomeKind, OutcomeRecord,
    OutcomeStore, RunId, RunRecord, RunStatus, RunStore, StepLedger, StepRecord, StepStatus,
    StorageResult,
};
pub use surreal_ledger::SurrealLedger;

/// Result type for vibe-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
