use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vibe_core::fakes::{FakeSandboxProvider, ScriptedModel};
use vibe_core::sandbox::SandboxProvider;
use vibe_core::{
    route, Agent, AssistantMessage, Completion, ModelError, Network, RetryPolicy, Route, RunId,
    RunState, StepContext, ToolSet,
};
use vibe_state::fakes::MemoryStepLedger;

async fn tools(provider: &Arc<FakeSandboxProvider>) -> ToolSet {
    let id = provider
        .create("vibe-aii-test2", Duration::from_secs(60))
        .await
        .unwrap();
    ToolSet::new(provider.clone(), id, Duration::from_secs(5))
}

fn ctx() -> StepContext {
    StepContext::new(RunId::new(), Arc::new(MemoryStepLedger::new()))
}

fn agent() -> Agent {
    Agent::code_agent().with_inference_retry(RetryPolicy::new(2, Duration::ZERO))
}

#[tokio::test]
async fn agent_without_marker_stops_at_the_ceiling() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let tools = tools(&provider).await;
    let model = ScriptedModel::new().with_fallback(AssistantMessage::text("still working"));
    let mut state = RunState::new();

    let result = Network::new(agent(), 5)
        .run(&ctx(), &model, &tools, "build a counter", &mut state)
        .await
        .unwrap();

    assert_eq!(result.completion, Completion::Exhausted);
    assert_eq!(result.iterations, 5);
    assert_eq!(model.calls(), 5);
    assert!(state.summary.is_none());
}

#[tokio::test]
async fn stops_right_after_the_marker() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let tools = tools(&provider).await;
    let model = ScriptedModel::new().with_fallback(AssistantMessage::text("unexpected"));
    model
        .push_reply(AssistantMessage::default().with_tool_call(
            "c1",
            "terminal",
            json!({"command": "ls"}),
        ))
        .push_reply(AssistantMessage::text("<task_summary>Listed files</task_summary>"));
    let mut state = RunState::new();

    let result = Network::new(agent(), 15)
        .run(&ctx(), &model, &tools, "list files", &mut state)
        .await
        .unwrap();

    assert_eq!(result.completion, Completion::Success);
    assert_eq!(result.iterations, 2);
    assert_eq!(model.calls(), 2);
    assert_eq!(
        state.summary.as_deref(),
        Some("<task_summary>Listed files</task_summary>")
    );
}

#[tokio::test]
async fn marker_on_last_permitted_turn_is_success() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let tools = tools(&provider).await;
    let model = ScriptedModel::new();
    model
        .push_reply(AssistantMessage::text("thinking"))
        .push_reply(AssistantMessage::text("<task_summary>done</task_summary>"));
    let mut state = RunState::new();

    let result = Network::new(agent(), 2)
        .run(&ctx(), &model, &tools, "x", &mut state)
        .await
        .unwrap();
    assert_eq!(result.completion, Completion::Success);
}

#[tokio::test]
async fn writes_in_the_completing_turn_are_kept() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let tools = tools(&provider).await;
    let model = ScriptedModel::new();
    model.push_reply(
        AssistantMessage::text("<task_summary>Added a page</task_summary>").with_tool_call(
            "c1",
            "createOrUpdateFiles",
            json!({"files": [{"path": "app/page.tsx", "content": "page"}]}),
        ),
    );
    let mut state = RunState::new();

    let result = Network::new(agent(), 15)
        .run(&ctx(), &model, &tools, "add a page", &mut state)
        .await
        .unwrap();

    assert_eq!(result.completion, Completion::Success);
    assert_eq!(state.files["app/page.tsx"], "page");
    assert!(!state.is_error());
}

#[tokio::test]
async fn transient_model_error_is_retried_within_the_step() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let tools = tools(&provider).await;
    let model = ScriptedModel::new();
    model
        .push_error(ModelError::Timeout)
        .push_reply(AssistantMessage::text("<task_summary>ok</task_summary>"));
    let mut state = RunState::new();

    let result = Network::new(agent(), 15)
        .run(&ctx(), &model, &tools, "x", &mut state)
        .await
        .unwrap();
    assert_eq!(result.completion, Completion::Success);
    assert_eq!(model.calls(), 2);
}

#[test]
fn routing_is_idempotent_once_summary_is_set() {
    let mut state = RunState::new();
    state.observe_turn(Some("<task_summary>done</task_summary>"));
    let routes: Vec<Route> = (0..5).map(|_| route(&state, "code-agent")).collect();
    assert!(routes.iter().all(|r| *r == Route::Stop));
}
