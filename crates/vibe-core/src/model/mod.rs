//! Language model abstraction.
//!
//! The engine talks to models through [`LanguageModel`]: a system prompt, the
//! conversation so far and the tool schemas go in, one assistant turn comes
//! out. Turns are plain serde values so the step ledger can memoize them.

pub mod error;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{ModelError, ModelResult};
pub use openai::OpenAiChatModel;

use crate::tools::ToolSpec;

/// Assistant text: either a plain string or an ordered list of text parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<TextPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

impl MessageContent {
    /// Plain strings as-is; parts concatenated in order.
    pub fn joined(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts.iter().map(|p| p.text.as_str()).collect(),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One assistant response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(MessageContent::Text(text.into())),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, id: &str, name: &str, arguments: Value) -> Self {
        self.tool_calls.push(ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        });
        self
    }

    /// Text of the message, `None` when absent or empty.
    pub fn text_content(&self) -> Option<String> {
        self.content
            .as_ref()
            .map(MessageContent::joined)
            .filter(|t| !t.is_empty())
    }
}

/// A conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant(AssistantMessage),
    Tool { tool_call_id: String, content: String },
}

/// Text of the most recent assistant message, if it has any.
pub fn last_assistant_text(history: &[Message]) -> Option<String> {
    history.iter().rev().find_map(|m| match m {
        Message::Assistant(msg) => Some(msg.text_content()),
        _ => None,
    })?
}

/// Everything the model needs to produce the next turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

/// Produces the next assistant turn.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> ModelResult<AssistantMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_concatenated_in_order() {
        let content: MessageContent =
            serde_json::from_str(r#"[{"text":"a"},{"text":"b"}]"#).unwrap();
        assert_eq!(content.joined(), "ab");
    }

    #[test]
    fn last_assistant_text_skips_tool_messages() {
        let history = vec![
            Message::User { content: "hi".into() },
            Message::Assistant(AssistantMessage::text("done <task_summary>x</task_summary>")),
            Message::Tool {
                tool_call_id: "1".into(),
                content: "ok".into(),
            },
        ];
        assert_eq!(
            last_assistant_text(&history).as_deref(),
            Some("done <task_summary>x</task_summary>")
        );
    }

    #[test]
    fn empty_assistant_text_is_none() {
        let history = vec![
            Message::Assistant(AssistantMessage::text("earlier")),
            Message::Assistant(AssistantMessage::default()),
        ];
        assert_eq!(last_assistant_text(&history), None);
    }

    #[test]
    fn message_role_tagging() {
        let msg = Message::User { content: "x".into() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
    }
}
