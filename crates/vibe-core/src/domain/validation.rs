//! Submission-time validation of run requests.
//!
//! A request that fails here never becomes a run.

use super::run::RunRequest;

/// Longest accepted request text, in characters.
pub const MAX_VALUE_CHARS: usize = 10_000;

/// Errors produced by request validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message is required")]
    EmptyValue,

    #[error("message is too long: {len} characters (max {max})")]
    ValueTooLong { len: usize, max: usize },

    #[error("project id is required")]
    EmptyProjectId,
}

/// Validate and normalise a request.
///
/// The text is trimmed before the length checks, and the trimmed text is
/// what the run receives.
pub fn validate_request(request: &RunRequest) -> Result<RunRequest, ValidationError> {
    let value = request.value.trim();
    if value.is_empty() {
        return Err(ValidationError::EmptyValue);
    }
    let len = value.chars().count();
    if len > MAX_VALUE_CHARS {
        return Err(ValidationError::ValueTooLong {
            len,
            max: MAX_VALUE_CHARS,
        });
    }
    let project_id = request.project_id.trim();
    if project_id.is_empty() {
        return Err(ValidationError::EmptyProjectId);
    }
    Ok(RunRequest {
        value: value.to_string(),
        project_id: project_id.to_string(),
    })
}
