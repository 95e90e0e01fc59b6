//! Tool specs and strict argument parsing.
//!
//! Arguments are checked in two passes: required top-level fields first,
//! then a typed decode that rejects unknown fields and wrong types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ToolError, ToolResult};

pub const TERMINAL: &str = "terminal";
pub const CREATE_OR_UPDATE_FILES: &str = "createOrUpdateFiles";
pub const READ_FILES: &str = "readFiles";

/// A tool as described to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Minimal JSON schema: required top-level fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonFieldSchema {
    pub required_fields: Vec<String>,
}

impl JsonFieldSchema {
    pub fn required<const N: usize>(fields: [&str; N]) -> Self {
        Self {
            required_fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    fn validate(&self, tool: &str, payload: &Value) -> ToolResult<()> {
        let object = payload.as_object().ok_or_else(|| ToolError::SchemaValidation {
            tool: tool.to_string(),
            reason: "arguments must be a JSON object".to_string(),
        })?;
        for field in &self.required_fields {
            if !object.contains_key(field) {
                return Err(ToolError::SchemaValidation {
                    tool: tool.to_string(),
                    reason: format!("missing required field `{field}`"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalArgs {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrUpdateFilesArgs {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadFilesArgs {
    pub files: Vec<String>,
}

/// The closed set of tools, with validated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tool {
    Terminal(TerminalArgs),
    CreateOrUpdateFiles(CreateOrUpdateFilesArgs),
    ReadFiles(ReadFilesArgs),
}

impl Tool {
    /// Validate `arguments` against the schema of the tool called `name`.
    pub fn parse(name: &str, arguments: &Value) -> ToolResult<Self> {
        match name {
            TERMINAL => decode(name, ["command"], arguments).map(Tool::Terminal),
            CREATE_OR_UPDATE_FILES => {
                decode(name, ["files"], arguments).map(Tool::CreateOrUpdateFiles)
            }
            READ_FILES => decode(name, ["files"], arguments).map(Tool::ReadFiles),
            other => Err(ToolError::UnknownTool {
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Terminal(_) => TERMINAL,
            Tool::CreateOrUpdateFiles(_) => CREATE_OR_UPDATE_FILES,
            Tool::ReadFiles(_) => READ_FILES,
        }
    }
}

fn decode<T: DeserializeOwned, const N: usize>(
    tool: &str,
    required: [&str; N],
    arguments: &Value,
) -> ToolResult<T> {
    JsonFieldSchema::required(required).validate(tool, arguments)?;
    serde_json::from_value(arguments.clone()).map_err(|e| ToolError::SchemaValidation {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Specs for the three sandbox tools, in a fixed order.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: TERMINAL.to_string(),
            description: "Use the terminal to run commands".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: CREATE_OR_UPDATE_FILES.to_string(),
            description: "Create or update files in the sandbox".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string" },
                                "content": { "type": "string" }
                            },
                            "required": ["path", "content"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["files"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: READ_FILES.to_string(),
            description: "Read files from the sandbox".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["files"],
                "additionalProperties": false
            }),
        },
    ]
}
