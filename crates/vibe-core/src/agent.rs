//! Agents: a system prompt and a tool set driven against a language model.
//!
//! One turn is one memoized inference followed by the tool calls it
//! requested, executed in order. Completion is checked after the tool calls
//! so a turn that writes files and announces the summary keeps its writes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{
    last_assistant_text, AssistantMessage, InferenceRequest, LanguageModel, Message, ModelError,
};
use crate::prompt;
use crate::state::RunState;
use crate::step::{RetryPolicy, StepContext, StepResult};
use crate::tools::{ToolSet, ToolSpec};

pub const CODE_AGENT: &str = "code-agent";
pub const TITLE_AGENT: &str = "fragment-title-generator";
pub const RESPONSE_AGENT: &str = "response-generator";

/// A bounded conversational actor.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub description: String,
    pub system: String,
    pub tools: Vec<ToolSpec>,
    /// In-step retry for transient model errors.
    inference_retry: RetryPolicy,
}

/// What a single turn did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    pub tool_calls: usize,
    pub complete: bool,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system: impl Into<String>,
        tools: Vec<ToolSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system: system.into(),
            tools,
            inference_retry: RetryPolicy::default(),
        }
    }

    /// The coding agent with the three sandbox tools.
    pub fn code_agent() -> Self {
        Self::new(
            CODE_AGENT,
            "An expert coding agent",
            prompt::CODE_AGENT_PROMPT,
            ToolSet::specs(),
        )
    }

    pub fn title_agent() -> Self {
        Self::new(
            TITLE_AGENT,
            "A fragment title generator",
            prompt::FRAGMENT_TITLE_PROMPT,
            Vec::new(),
        )
    }

    pub fn response_agent() -> Self {
        Self::new(
            RESPONSE_AGENT,
            "A response generator",
            prompt::RESPONSE_PROMPT,
            Vec::new(),
        )
    }

    pub fn with_inference_retry(mut self, policy: RetryPolicy) -> Self {
        self.inference_retry = policy;
        self
    }

    /// One memoized inference over `messages`.
    pub async fn infer(
        &self,
        ctx: &StepContext,
        model: &dyn LanguageModel,
        messages: &[Message],
    ) -> StepResult<AssistantMessage> {
        let request = InferenceRequest {
            system: self.system.clone(),
            messages: messages.to_vec(),
            tools: self.tools.clone(),
        };
        let step_name = format!("{}:inference", self.name);
        let retry = self.inference_retry;
        ctx.run(&step_name, || async {
            retry
                .run(ModelError::is_retryable, |_| model.infer(&request))
                .await
        })
        .await
    }

    /// Run one turn: infer, execute requested tools in order, then check the
    /// latest assistant text for the completion marker.
    pub async fn run_turn(
        &self,
        ctx: &StepContext,
        model: &dyn LanguageModel,
        tools: &ToolSet,
        history: &mut Vec<Message>,
        state: &mut RunState,
    ) -> StepResult<TurnReport> {
        let reply = self.infer(ctx, model, history).await?;
        let calls = reply.tool_calls.clone();
        history.push(Message::Assistant(reply));

        for call in &calls {
            let outcome = tools.execute(ctx, state, &call.name, &call.arguments).await?;
            debug!(
                agent = %self.name,
                tool = %outcome.tool_name,
                is_error = outcome.is_error,
                "tool call finished"
            );
            history.push(Message::Tool {
                tool_call_id: call.id.clone(),
                content: outcome.output,
            });
        }

        let complete = state.observe_turn(last_assistant_text(history).as_deref());
        Ok(TurnReport {
            tool_calls: calls.len(),
            complete,
        })
    }
}
