//! Run state shared by every tool call and agent turn of one run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tag whose presence in assistant text marks the task as finished.
pub const COMPLETION_MARKER: &str = "<task_summary>";

/// Mutable state of one run.
///
/// Owned by the task driving the run and passed by `&mut`. Once a summary is
/// observed the state is frozen: the summary never changes and file merges
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub files: BTreeMap<String, String>,
    pub summary: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.summary.is_some()
    }

    /// Merge written files, last writer wins per path.
    pub fn merge_files(&mut self, files: impl IntoIterator<Item = (String, String)>) {
        if self.is_complete() {
            return;
        }
        self.files.extend(files);
    }

    /// Inspect the text of the turn's latest assistant message.
    ///
    /// Stores the whole text as the summary when it contains the completion
    /// marker. Returns whether the state is complete afterwards.
    pub fn observe_turn(&mut self, assistant_text: Option<&str>) -> bool {
        if self.summary.is_none() {
            if let Some(text) = assistant_text.filter(|t| t.contains(COMPLETION_MARKER)) {
                self.summary = Some(text.to_string());
            }
        }
        self.is_complete()
    }

    /// A run without a summary or without files has nothing to show.
    pub fn is_error(&self) -> bool {
        self.summary.is_none() || self.files.is_empty()
    }
}
