//! `createOrUpdateFiles` and `readFiles`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::schema::FileEntry;
use crate::sandbox::SandboxProvider;

/// Memoized result of a write batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Every file was written; these pairs go into the run state.
    Written { files: BTreeMap<String, String> },
    /// A write failed. Earlier writes of the batch stay in the sandbox.
    Failed { error: String },
}

impl WriteOutcome {
    /// Text returned to the model.
    pub fn reply(&self) -> String {
        match self {
            WriteOutcome::Written { files } => {
                let paths: Vec<&str> = files.keys().map(String::as_str).collect();
                format!("Updated files: {}", paths.join(", "))
            }
            WriteOutcome::Failed { error } => format!("Error creating files: {error}"),
        }
    }
}

/// Write each entry in order, stopping at the first failure.
pub(crate) async fn write_files(
    provider: &dyn SandboxProvider,
    sandbox_id: &str,
    entries: &[FileEntry],
) -> WriteOutcome {
    let sandbox = match provider.connect(sandbox_id).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            return WriteOutcome::Failed {
                error: e.to_string(),
            }
        }
    };
    let mut written = BTreeMap::new();
    for entry in entries {
        if let Err(e) = sandbox.write_file(&entry.path, &entry.content).await {
            return WriteOutcome::Failed {
                error: e.to_string(),
            };
        }
        written.insert(entry.path.clone(), entry.content.clone());
    }
    WriteOutcome::Written { files: written }
}

/// Memoized result of a read batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadOutcome {
    Read { files: Vec<FileEntry> },
    /// A read failed; nothing of the batch is returned.
    Failed { error: String },
}

impl ReadOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReadOutcome::Failed { .. })
    }

    /// Text returned to the model: `[{path, content}]` as JSON.
    pub fn reply(&self) -> String {
        match self {
            ReadOutcome::Read { files } => serde_json::to_string(files)
                .unwrap_or_else(|e| format!("Error reading files: {e}")),
            ReadOutcome::Failed { error } => format!("Error reading files: {error}"),
        }
    }
}

/// Read each path in order, stopping at the first failure.
pub(crate) async fn read_files(
    provider: &dyn SandboxProvider,
    sandbox_id: &str,
    paths: &[String],
) -> ReadOutcome {
    let sandbox = match provider.connect(sandbox_id).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            return ReadOutcome::Failed {
                error: e.to_string(),
            }
        }
    };
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match sandbox.read_file(path).await {
            Ok(content) => files.push(FileEntry {
                path: path.clone(),
                content,
            }),
            Err(e) => {
                return ReadOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
    ReadOutcome::Read { files }
}
