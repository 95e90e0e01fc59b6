//! Post-run titling and response generation.

use crate::agent::Agent;
use crate::domain::DEFAULT_TITLE;
use crate::model::{AssistantMessage, LanguageModel, Message};
use crate::step::{StepContext, StepResult};

/// Text of the first output message, or `fallback` when it has none.
pub fn parse_agent_output(output: &AssistantMessage, fallback: &str) -> String {
    output
        .text_content()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// A short title for the fragment, from the run's summary.
pub async fn generate_title(
    ctx: &StepContext,
    model: &dyn LanguageModel,
    agent: &Agent,
    summary: &str,
) -> StepResult<String> {
    let output = agent.infer(ctx, model, &[user(summary)]).await?;
    Ok(parse_agent_output(&output, DEFAULT_TITLE))
}

/// A user-facing closing message, falling back to the summary itself.
pub async fn generate_response(
    ctx: &StepContext,
    model: &dyn LanguageModel,
    agent: &Agent,
    summary: &str,
) -> StepResult<String> {
    let output = agent.infer(ctx, model, &[user(summary)]).await?;
    Ok(parse_agent_output(&output, summary))
}

fn user(content: &str) -> Message {
    Message::User {
        content: content.to_string(),
    }
}
