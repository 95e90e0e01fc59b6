//! Error types for language model clients.

/// Errors produced while requesting an assistant turn.
///
/// Every variant is transient from the run's point of view: the inference
/// step fails, is recorded, and is re-executed on the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("model request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("model API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed tool call {name}: {reason}")]
    MalformedToolCall { name: String, reason: String },

    #[error("failed to parse model response: {0}")]
    Parse(String),

    #[error("model produced no reply: {0}")]
    Exhausted(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        match self {
            // Client errors other than rate limiting will not improve on retry.
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => true,
        }
    }
}

/// Result type for model operations.
pub type ModelResult<T> = std::result::Result<T, ModelError>;
