use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vibe_core::fakes::FakeSandboxProvider;
use vibe_core::sandbox::{CommandResult, SandboxProvider};
use vibe_core::{RunId, RunState, StepContext, ToolSet};
use vibe_state::fakes::MemoryStepLedger;
use vibe_state::StepLedger;

struct Fixture {
    provider: Arc<FakeSandboxProvider>,
    ledger: Arc<MemoryStepLedger>,
    run_id: RunId,
    sandbox_id: String,
    tools: ToolSet,
}

impl Fixture {
    async fn new() -> Self {
        let provider = Arc::new(FakeSandboxProvider::new());
        let sandbox_id = provider
            .create("vibe-aii-test2", Duration::from_secs(60))
            .await
            .unwrap();
        let tools = ToolSet::new(provider.clone(), sandbox_id.clone(), Duration::from_secs(5));
        Self {
            provider,
            ledger: Arc::new(MemoryStepLedger::new()),
            run_id: RunId::new(),
            sandbox_id,
            tools,
        }
    }

    fn ctx(&self) -> StepContext {
        StepContext::new(self.run_id.clone(), self.ledger.clone())
    }
}

#[tokio::test]
async fn partial_write_failure_leaves_state_untouched_but_sandbox_diverged() {
    let fx = Fixture::new().await;
    fx.provider.fail_writes_to("app/b.tsx");
    let mut state = RunState::new();

    let outcome = fx
        .tools
        .execute(
            &fx.ctx(),
            &mut state,
            "createOrUpdateFiles",
            &json!({"files": [
                {"path": "app/a.tsx", "content": "first"},
                {"path": "app/b.tsx", "content": "second"}
            ]}),
        )
        .await
        .unwrap();

    assert!(outcome.is_error);
    assert!(outcome.output.starts_with("Error creating files:"));
    assert!(state.files.is_empty());
    let sandbox_files = fx.provider.files(&fx.sandbox_id);
    assert_eq!(sandbox_files.get("app/a.tsx").map(String::as_str), Some("first"));
    assert!(!sandbox_files.contains_key("app/b.tsx"));
}

#[tokio::test]
async fn successful_write_merges_into_state() {
    let fx = Fixture::new().await;
    let mut state = RunState::new();

    let outcome = fx
        .tools
        .execute(
            &fx.ctx(),
            &mut state,
            "createOrUpdateFiles",
            &json!({"files": [{"path": "app/page.tsx", "content": "export default 1"}]}),
        )
        .await
        .unwrap();

    assert!(!outcome.is_error);
    assert_eq!(outcome.output, "Updated files: app/page.tsx");
    assert_eq!(state.files["app/page.tsx"], "export default 1");
}

#[tokio::test]
async fn invalid_arguments_fail_closed_before_any_step() {
    let fx = Fixture::new().await;
    let mut state = RunState::new();

    let outcome = fx
        .tools
        .execute(&fx.ctx(), &mut state, "terminal", &json!({"cmd": "rm -rf /"}))
        .await
        .unwrap();

    assert!(outcome.is_error);
    assert!(outcome.output.contains("invalid arguments for tool terminal"));
    assert!(fx.provider.commands(&fx.sandbox_id).is_empty());
    assert!(fx.ledger.list_steps(&fx.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let fx = Fixture::new().await;
    let mut state = RunState::new();
    let outcome = fx
        .tools
        .execute(&fx.ctx(), &mut state, "deploy", &json!({}))
        .await
        .unwrap();
    assert!(outcome.is_error);
    assert_eq!(outcome.output, "unknown tool: deploy");
}

#[tokio::test]
async fn terminal_nonzero_exit_becomes_failure_text() {
    let fx = Fixture::new().await;
    fx.provider.script_command(
        "npm install left-pad --yes",
        CommandResult {
            exit_code: 1,
            stdout: "resolving".into(),
            stderr: "ERR! 404".into(),
        },
    );
    let mut state = RunState::new();

    let outcome = fx
        .tools
        .execute(
            &fx.ctx(),
            &mut state,
            "terminal",
            &json!({"command": "npm install left-pad --yes"}),
        )
        .await
        .unwrap();

    assert!(outcome.is_error);
    assert_eq!(
        outcome.output,
        "command failed: exit code 1 \nstdout: resolving \nstderr: ERR! 404"
    );
}

#[tokio::test]
async fn terminal_timeout_keeps_partial_output() {
    let fx = Fixture::new().await;
    fx.provider.script_timeout("sleep 999", "tick\n");
    let mut state = RunState::new();

    let outcome = fx
        .tools
        .execute(&fx.ctx(), &mut state, "terminal", &json!({"command": "sleep 999"}))
        .await
        .unwrap();

    assert!(outcome.is_error);
    assert!(outcome.output.starts_with("command failed: command timed out"));
    assert!(outcome.output.contains("stdout: tick\n"));
}

#[tokio::test]
async fn terminal_success_returns_stdout() {
    let fx = Fixture::new().await;
    fx.provider.script_command(
        "ls",
        CommandResult {
            exit_code: 0,
            stdout: "app\npackage.json\n".into(),
            stderr: String::new(),
        },
    );
    let mut state = RunState::new();
    let outcome = fx
        .tools
        .execute(&fx.ctx(), &mut state, "terminal", &json!({"command": "ls"}))
        .await
        .unwrap();
    assert!(!outcome.is_error);
    assert_eq!(outcome.output, "app\npackage.json\n");
}

#[tokio::test]
async fn successful_command_is_not_an_error_whatever_it_prints() {
    let fx = Fixture::new().await;
    fx.provider.script_command(
        "cat log.txt",
        CommandResult {
            exit_code: 0,
            stdout: "command failed: yesterday's build\n".into(),
            stderr: String::new(),
        },
    );
    let mut state = RunState::new();

    let outcome = fx
        .tools
        .execute(&fx.ctx(), &mut state, "terminal", &json!({"command": "cat log.txt"}))
        .await
        .unwrap();

    assert!(!outcome.is_error);
    assert_eq!(outcome.output, "command failed: yesterday's build\n");

    let record = fx
        .ledger
        .get_step(&fx.run_id, "terminal")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.output.unwrap()["status"], "completed");
}

#[tokio::test]
async fn expired_sandbox_is_tool_text_not_an_error() {
    let fx = Fixture::new().await;
    fx.provider.expire(&fx.sandbox_id);
    let mut state = RunState::new();

    let outcome = fx
        .tools
        .execute(&fx.ctx(), &mut state, "terminal", &json!({"command": "ls"}))
        .await
        .unwrap();

    assert!(outcome.is_error);
    assert!(outcome
        .output
        .contains(&format!("Sandbox with ID {} not found", fx.sandbox_id)));
}

#[tokio::test]
async fn read_files_returns_json_and_aborts_on_missing_file() {
    let fx = Fixture::new().await;
    fx.provider
        .seed_file(&fx.sandbox_id, "/home/user/app/page.tsx", "hello");
    let mut state = RunState::new();
    let ctx = fx.ctx();

    let found = fx
        .tools
        .execute(
            &ctx,
            &mut state,
            "readFiles",
            &json!({"files": ["/home/user/app/page.tsx"]}),
        )
        .await
        .unwrap();
    assert!(!found.is_error);
    let parsed: serde_json::Value = serde_json::from_str(&found.output).unwrap();
    assert_eq!(
        parsed,
        json!([{"path": "/home/user/app/page.tsx", "content": "hello"}])
    );

    let missing = fx
        .tools
        .execute(
            &ctx,
            &mut state,
            "readFiles",
            &json!({"files": ["/home/user/app/page.tsx", "/home/user/nope.ts"]}),
        )
        .await
        .unwrap();
    assert!(missing.is_error);
    assert_eq!(
        missing.output,
        "Error reading files: file not found: /home/user/nope.ts"
    );
}

#[tokio::test]
async fn replayed_tool_call_does_not_touch_the_sandbox_again() {
    let fx = Fixture::new().await;
    let args = json!({"command": "npm install zod --yes"});

    for _ in 0..3 {
        let mut state = RunState::new();
        fx.tools
            .execute(&fx.ctx(), &mut state, "terminal", &args)
            .await
            .unwrap();
    }

    assert_eq!(fx.provider.commands(&fx.sandbox_id).len(), 1);
}

#[tokio::test]
async fn replayed_write_still_updates_state() {
    let fx = Fixture::new().await;
    let args = json!({"files": [{"path": "app/page.tsx", "content": "v1"}]});

    let mut first = RunState::new();
    fx.tools
        .execute(&fx.ctx(), &mut first, "createOrUpdateFiles", &args)
        .await
        .unwrap();

    // A new attempt rebuilds its state from the memoized step result.
    fx.provider.fail_writes_to("app/page.tsx");
    let mut second = RunState::new();
    let outcome = fx
        .tools
        .execute(&fx.ctx(), &mut second, "createOrUpdateFiles", &args)
        .await
        .unwrap();

    assert!(!outcome.is_error);
    assert_eq!(first, second);
}
