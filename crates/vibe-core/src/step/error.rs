//! Error types for the step executor.

use vibe_state::StorageError;

/// Errors produced while running or replaying a step.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// The step body returned an error. Nothing was memoized.
    #[error("step {step_id} failed: {reason}")]
    Failed { step_id: String, reason: String },

    /// The ledger could not be read or written.
    #[error("step ledger error: {0}")]
    Storage(#[from] StorageError),

    /// The step output could not be converted to or from JSON.
    #[error("step {step_id} output codec error: {reason}")]
    Codec { step_id: String, reason: String },
}

/// Result type for step operations.
pub type StepResult<T> = std::result::Result<T, StepError>;
