//! Error types for the sandbox module.

/// Errors produced by sandbox providers and handles.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox with ID {sandbox_id} not found")]
    SandboxNotFound { sandbox_id: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("command timed out after {limit_ms}ms")]
    CommandTimeout { limit_ms: u64 },

    #[error("sandbox provider error: {0}")]
    Provider(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
