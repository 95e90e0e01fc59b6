//! Run-level error taxonomy.
//!
//! Tool faults never appear here: they become tool-result text the agent
//! reads. Only step-level and run-level faults reach a run's error outcome.

use vibe_state::StorageError;

use crate::domain::validation::ValidationError;
use crate::step::StepError;

/// Errors that end (or would end) a run attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("step {step_id} failed: {reason}")]
    StepExecutionFailure { step_id: String, reason: String },

    #[error("agent did not finish within {iterations} iterations")]
    IterationExhausted { iterations: u32 },

    #[error("run exceeded its {limit_secs}s time limit")]
    RunTimeout { limit_secs: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RunError {
    /// Whether another whole-run attempt may succeed.
    ///
    /// Step failures and storage hiccups are transient; an exhausted
    /// network would replay the same memoized turns and exhaust again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunError::StepExecutionFailure { .. } | RunError::Storage(_)
        )
    }

    /// Short machine-readable tag for logs and run records.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::StepExecutionFailure { .. } => "step_execution_failure",
            RunError::IterationExhausted { .. } => "iteration_exhausted",
            RunError::RunTimeout { .. } => "run_timeout",
            RunError::InvalidInput(_) => "invalid_input",
            RunError::Storage(_) => "storage",
        }
    }
}

impl From<StepError> for RunError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Failed { step_id, reason } => {
                RunError::StepExecutionFailure { step_id, reason }
            }
            StepError::Codec { step_id, reason } => {
                RunError::StepExecutionFailure { step_id, reason }
            }
            StepError::Storage(e) => RunError::Storage(e),
        }
    }
}

/// Result type for run-level operations.
pub type RunResult<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        let step = RunError::StepExecutionFailure {
            step_id: "terminal".into(),
            reason: "boom".into(),
        };
        assert!(step.is_retryable());
        assert!(!RunError::IterationExhausted { iterations: 15 }.is_retryable());
        assert!(!RunError::RunTimeout { limit_secs: 1800 }.is_retryable());
        assert!(!RunError::InvalidInput(ValidationError::EmptyValue).is_retryable());
    }

    #[test]
    fn step_error_maps_to_step_execution_failure() {
        let err: RunError = StepError::Failed {
            step_id: "get-sandbox-id".into(),
            reason: "provider down".into(),
        }
        .into();
        assert_eq!(err.kind(), "step_execution_failure");
        assert!(err.to_string().contains("get-sandbox-id"));
    }
}
