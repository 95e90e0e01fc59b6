//! OpenAI-compatible chat completions client.
//!
//! Works with GitHub Models, Azure OpenAI and any endpoint exposing
//! `POST {base_url}/chat/completions` with function-style tools.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{
    AssistantMessage, InferenceRequest, LanguageModel, Message, MessageContent, ModelError,
    ModelResult, ToolInvocation,
};
use crate::config::ModelConfig;

/// Chat completions client.
pub struct OpenAiChatModel {
    client: Client,
    config: ModelConfig,
}

impl OpenAiChatModel {
    pub fn new(config: ModelConfig) -> ModelResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> ModelResult<Self> {
        Self::new(ModelConfig::from_env())
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    #[instrument(skip(self, request), fields(model = %self.config.model, messages = request.messages.len()))]
    async fn infer(&self, request: &InferenceRequest) -> ModelResult<AssistantMessage> {
        let body = wire_request(&self.config, request);

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;
        let message = parse_response(parsed)?;
        debug!(tool_calls = message.tool_calls.len(), "model turn received");
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn plain(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: WireCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCall {
    name: String,
    /// JSON-encoded arguments.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

fn wire_request(config: &ModelConfig, request: &InferenceRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(WireMessage::plain("system", &request.system));
    for message in &request.messages {
        messages.push(match message {
            Message::System { content } => WireMessage::plain("system", content),
            Message::User { content } => WireMessage::plain("user", content),
            Message::Assistant(msg) => WireMessage {
                role: "assistant",
                content: msg.content.as_ref().map(MessageContent::joined),
                tool_calls: msg
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        r#type: function_type(),
                        function: WireCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            Message::Tool {
                tool_call_id,
                content,
            } => WireMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_call_id.clone()),
            },
        });
    }

    ChatRequest {
        model: config.model.clone(),
        messages,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        tools: request
            .tools
            .iter()
            .map(|spec| WireTool {
                r#type: "function",
                function: WireFunction {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.parameters.clone(),
                },
            })
            .collect(),
    }
}

fn parse_response(response: ChatResponse) -> ModelResult<AssistantMessage> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Exhausted("no choices in response".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = if call.function.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    ModelError::MalformedToolCall {
                        name: call.function.name.clone(),
                        reason: e.to_string(),
                    }
                })?
            };
            Ok(ToolInvocation {
                id: call.id,
                name: call.function.name,
                arguments,
            })
        })
        .collect::<ModelResult<Vec<_>>>()?;

    Ok(AssistantMessage {
        content: choice.message.content.map(MessageContent::Text),
        tool_calls,
    })
}
