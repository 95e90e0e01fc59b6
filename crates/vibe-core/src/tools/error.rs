//! Error types for tool dispatch.

/// Errors raised before a tool body runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments for tool {tool}: {reason}")]
    SchemaValidation { tool: String, reason: String },

    #[error("unknown tool: {name}")]
    UnknownTool { name: String },
}

/// Result type for tool dispatch.
pub type ToolResult<T> = std::result::Result<T, ToolError>;
