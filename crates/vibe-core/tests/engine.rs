use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use vibe_core::engine::{NO_FILES_ERROR, PERSISTED_ERROR};
use vibe_core::fakes::{FakeSandboxProvider, ScriptedModel};
use vibe_core::model::{InferenceRequest, ModelResult};
use vibe_core::prompt::FRAGMENT_TITLE_PROMPT;
use vibe_core::sandbox::SandboxProvider;
use vibe_core::{
    AssistantMessage, CodeAgentEngine, EngineConfig, EngineStores, LanguageModel, ModelError,
    OutcomeKind, ResultSink, RunError, RunRequest, RunStatus, StepContext, Verdict,
    GENERIC_ERROR_MESSAGE,
};
use vibe_state::fakes::{MemoryOutcomeStore, MemoryRunStore, MemoryStepLedger};
use vibe_state::{OutcomeStore, RunStore, StepLedger, SurrealLedger};

const SUMMARY: &str = "<task_summary>\nBuilt a counter with increment and reset.\n</task_summary>";

fn config() -> EngineConfig {
    EngineConfig::default().with_backoff_base(Duration::ZERO)
}

fn engine(
    config: EngineConfig,
    provider: &Arc<FakeSandboxProvider>,
    model: &Arc<ScriptedModel>,
    stores: &EngineStores,
) -> CodeAgentEngine {
    CodeAgentEngine::new(config, provider.clone(), model.clone(), stores.clone())
}

/// Write `app/page.tsx`, then announce completion.
fn script_counter(model: &ScriptedModel) {
    model
        .push_reply(AssistantMessage::default().with_tool_call(
            "call_1",
            "createOrUpdateFiles",
            json!({"files": [{"path": "app/page.tsx", "content": "export default function Counter() {}"}]}),
        ))
        .push_reply(AssistantMessage::text(SUMMARY));
}

#[tokio::test]
async fn build_a_counter_end_to_end() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    let stores = EngineStores::memory();

    let report = engine(config(), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(report.run.attempts, 1);

    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Result);
    assert_eq!(outcome.content, SUMMARY);
    let fragment = outcome.fragment.unwrap();
    assert_eq!(fragment.sandbox_url, "https://3000-sbx-1.sandbox.test");
    assert_eq!(fragment.title, "Fragment");
    assert_eq!(
        fragment.files,
        BTreeMap::from([(
            "app/page.tsx".to_string(),
            "export default function Counter() {}".to_string()
        )])
    );

    let output = report.output.unwrap();
    assert_eq!(output.url, fragment.sandbox_url);
    assert_eq!(output.files, fragment.files);
    assert_eq!(output.summary.as_deref(), Some(SUMMARY));
    assert_eq!(provider.files("sbx-1")["app/page.tsx"], fragment.files["app/page.tsx"]);
}

#[tokio::test]
async fn resumed_run_reuses_the_sandbox() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    let stores = EngineStores::memory();
    let engine = engine(config(), &provider, &model, &stores);

    // A previous worker created the sandbox and then died.
    let run = engine
        .submit(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();
    stores.runs.mark_running(&run.run_id).await.unwrap();
    let crashed = StepContext::new(run.run_id.clone(), stores.steps.clone());
    let sandbox_id: String = crashed
        .run("get-sandbox-id", || async {
            provider.create("vibe-aii-test2", Duration::from_secs(60)).await
        })
        .await
        .unwrap();

    let report = engine.execute(&run.run_id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(provider.create_count(), 1);
    assert!(report
        .outcome
        .unwrap()
        .fragment
        .unwrap()
        .sandbox_url
        .contains(&sandbox_id));
}

#[tokio::test]
async fn failed_attempt_is_retried_with_memoized_steps() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    model.push_error(ModelError::Api {
        status: 400,
        body: "bad request".into(),
    });
    script_counter(&model);
    let stores = EngineStores::memory();

    let report = engine(config(), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(report.run.attempts, 2);
    assert_eq!(provider.create_count(), 1);

    let inference = stores
        .steps
        .get_step(&report.run.run_id, "code-agent:inference")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inference.failures, 1);
    assert!(inference.is_completed());
}

#[tokio::test]
async fn outcome_is_persisted_exactly_once() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    let stores = EngineStores::memory();
    let engine = engine(config(), &provider, &model, &stores);

    let first = engine
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();
    let calls = model.calls();
    let second = engine.execute(&first.run.run_id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(model.calls(), calls);
    assert_eq!(stores.outcomes.list_for_project("p1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn outcome_write_failure_is_retried() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    let outcomes = Arc::new(MemoryOutcomeStore::new());
    outcomes.fail_next_inserts(2);
    let stores = EngineStores {
        steps: Arc::new(MemoryStepLedger::new()),
        runs: Arc::new(MemoryRunStore::new()),
        outcomes: outcomes.clone(),
    };

    let report = engine(config(), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(outcomes.len(), 1);
}

#[tokio::test]
async fn never_finishing_agent_fails_with_iteration_exhausted() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new().with_fallback(AssistantMessage::text("hmm")));
    let stores = EngineStores::memory();

    let report = engine(config().with_max_iterations(3), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.run.attempts, 1);
    assert_eq!(
        report.run.error.as_deref(),
        Some("agent did not finish within 3 iterations")
    );
    assert_eq!(model.calls(), 3);

    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Error);
    assert_eq!(outcome.content, GENERIC_ERROR_MESSAGE);
    assert!(outcome.fragment.is_none());
    assert!(report.output.is_none());
}

#[tokio::test]
async fn summary_without_files_is_an_error_outcome() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    model.push_reply(AssistantMessage::text(SUMMARY));
    let stores = EngineStores::memory();

    let report = engine(config(), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.run.error.as_deref(), Some(NO_FILES_ERROR));
    assert_eq!(report.outcome.unwrap().kind, OutcomeKind::Error);
}

#[tokio::test]
async fn sandbox_creation_failures_exhaust_attempts() {
    let provider = Arc::new(FakeSandboxProvider::new());
    provider.fail_next_creates(10);
    let model = Arc::new(ScriptedModel::new());
    let stores = EngineStores::memory();

    let report = engine(config().with_max_attempts(3), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.run.attempts, 3);
    assert!(report.run.error.unwrap().contains("get-sandbox-id"));
    assert_eq!(model.calls(), 0);
    assert_eq!(report.outcome.unwrap().kind, OutcomeKind::Error);
}

#[tokio::test]
async fn titles_and_response_are_generated_when_enabled() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    model
        .push_reply(AssistantMessage::text("Counter App"))
        .push_reply(AssistantMessage::text("I built you a counter."));
    let stores = EngineStores::memory();

    let report = engine(config().with_generate_titles(true), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.content, "I built you a counter.");
    assert_eq!(outcome.fragment.unwrap().title, "Counter App");
    assert_eq!(report.output.unwrap().title, "Counter App");
    assert_eq!(model.systems()[2], FRAGMENT_TITLE_PROMPT);
}

#[tokio::test]
async fn invalid_request_creates_no_run() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    let stores = EngineStores::memory();
    let engine = engine(config(), &provider, &model, &stores);

    let err = engine
        .submit(RunRequest::new("   ", "p1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::InvalidInput(_)));
    let err = engine
        .submit(RunRequest::new("build a counter", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::InvalidInput(_)));
    assert!(stores.runs.list_runs(None).await.unwrap().is_empty());
}

struct StalledModel;

#[async_trait]
impl LanguageModel for StalledModel {
    async fn infer(&self, _request: &InferenceRequest) -> ModelResult<AssistantMessage> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(AssistantMessage::text("too late"))
    }
}

#[tokio::test(start_paused = true)]
async fn run_timeout_is_fatal() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let stores = EngineStores::memory();
    let engine = CodeAgentEngine::new(
        config().with_run_timeout(Duration::from_secs(1)),
        provider,
        Arc::new(StalledModel),
        stores,
    );

    let report = engine
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(
        report.run.error.as_deref(),
        Some("run exceeded its 1s time limit")
    );
    assert_eq!(report.outcome.unwrap().kind, OutcomeKind::Error);
}

#[tokio::test]
async fn resumed_run_gets_only_the_time_it_has_left() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    let stores = EngineStores::memory();
    let engine = engine(
        config().with_run_timeout(Duration::from_millis(20)),
        &provider,
        &model,
        &stores,
    );

    // A previous worker started the run and used up its whole limit.
    let run = engine
        .submit(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();
    stores.runs.mark_running(&run.run_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let report = engine.execute(&run.run_id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(
        report.run.error.as_deref(),
        Some("run exceeded its 0s time limit")
    );
    assert_eq!(report.outcome.unwrap().kind, OutcomeKind::Error);
    assert_eq!(model.calls(), 0);
    assert_eq!(provider.create_count(), 0);
}

#[tokio::test]
async fn persisted_error_outcome_decides_the_resumed_status() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    let stores = EngineStores::memory();
    let engine = engine(config(), &provider, &model, &stores);

    // A previous worker saved an ERROR outcome and died before finishing the run.
    let run = engine
        .submit(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();
    let run = stores.runs.mark_running(&run.run_id).await.unwrap();
    let crashed = StepContext::new(run.run_id.clone(), stores.steps.clone());
    ResultSink::new(stores.outcomes.clone())
        .persist(&crashed, &run, Verdict::Failure)
        .await
        .unwrap();

    // This execution completes the agent, but the stored outcome stands.
    let report = engine.execute(&run.run_id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.run.error.as_deref(), Some(PERSISTED_ERROR));
    assert_eq!(report.outcome.unwrap().kind, OutcomeKind::Error);
    assert!(report.output.is_none());
    assert!(stores
        .steps
        .get_step(&run.run_id, "run-output")
        .await
        .unwrap()
        .is_none());
    assert_eq!(stores.outcomes.list_for_project("p1").await.unwrap().len(), 1);

    let again = engine.execute(&run.run_id).await.unwrap();
    assert_eq!(again.run.status, RunStatus::Failed);
    assert!(again.output.is_none());
}

#[tokio::test]
async fn surreal_backed_run_records_every_step() {
    let provider = Arc::new(FakeSandboxProvider::new());
    let model = Arc::new(ScriptedModel::new());
    script_counter(&model);
    let stores = EngineStores::surreal(SurrealLedger::in_memory().await.unwrap());

    let report = engine(config(), &provider, &model, &stores)
        .run(RunRequest::new("build a counter", "p1"))
        .await
        .unwrap();
    assert_eq!(report.run.status, RunStatus::Succeeded);

    let steps: Vec<String> = stores
        .steps
        .list_steps(&report.run.run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.step_id)
        .collect();
    assert_eq!(
        steps,
        vec![
            "get-sandbox-id",
            "code-agent:inference",
            "createOrUpdateFiles",
            "code-agent:inference:1",
            "get-sandbox-url",
            "save-result",
            "run-output",
        ]
    );

    let replayed = CodeAgentEngine::new(config(), provider, model, stores.clone())
        .execute(&report.run.run_id)
        .await
        .unwrap();
    assert_eq!(replayed.output, report.output);
}
