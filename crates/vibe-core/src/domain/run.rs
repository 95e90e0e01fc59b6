//! Run inputs and outputs as they cross the engine boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the inbound event that starts a run.
pub const EVENT_NAME: &str = "code-agent/run";

/// Title used whenever no generated title is available.
pub const DEFAULT_TITLE: &str = "Fragment";

/// The user's request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Natural-language request text.
    pub value: String,
    pub project_id: String,
}

impl RunRequest {
    pub fn new(value: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            project_id: project_id.into(),
        }
    }
}

/// Inbound trigger: `{"name": "code-agent/run", "data": {"value", "projectId"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub name: String,
    pub data: RunRequest,
}

impl TriggerEvent {
    pub fn code_agent_run(request: RunRequest) -> Self {
        Self {
            name: EVENT_NAME.to_string(),
            data: request,
        }
    }

    /// Whether this event should start a run.
    pub fn is_code_agent_run(&self) -> bool {
        self.name == EVENT_NAME
    }
}

/// Return value of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    /// Preview URL of the sandbox.
    pub url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
    pub summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_event_wire_shape() {
        let raw = r#"{"name":"code-agent/run","data":{"value":"build a counter","projectId":"p1"}}"#;
        let event: TriggerEvent = serde_json::from_str(raw).unwrap();
        assert!(event.is_code_agent_run());
        assert_eq!(event.data, RunRequest::new("build a counter", "p1"));
    }

    #[test]
    fn other_events_are_not_runs() {
        let event = TriggerEvent {
            name: "test/hello.world".into(),
            data: RunRequest::new("x", "p"),
        };
        assert!(!event.is_code_agent_run());
    }
}
