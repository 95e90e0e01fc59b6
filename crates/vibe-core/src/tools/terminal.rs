//! `terminal`: run a shell command in the sandbox.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sandbox::{OutputBuffers, SandboxProvider};

/// Memoized result of a terminal call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Exit code 0.
    Completed { stdout: String },
    /// Non-zero exit, missing sandbox or timeout, with the output captured
    /// before the failure.
    Failed {
        error: String,
        stdout: String,
        stderr: String,
    },
}

impl CommandOutcome {
    fn failed(error: impl ToString, buffers: OutputBuffers) -> Self {
        CommandOutcome::Failed {
            error: error.to_string(),
            stdout: buffers.stdout,
            stderr: buffers.stderr,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CommandOutcome::Failed { .. })
    }

    /// Text returned to the model.
    pub fn reply(&self) -> String {
        match self {
            CommandOutcome::Completed { stdout } => stdout.clone(),
            CommandOutcome::Failed {
                error,
                stdout,
                stderr,
            } => format!("command failed: {error} \nstdout: {stdout} \nstderr: {stderr}"),
        }
    }
}

/// Run `command` in the sandbox.
pub(crate) async fn run_terminal(
    provider: &dyn SandboxProvider,
    sandbox_id: &str,
    command: &str,
    timeout: Duration,
) -> CommandOutcome {
    let mut buffers = OutputBuffers::default();
    let result = match provider.connect(sandbox_id).await {
        Ok(sandbox) => sandbox.run_command(command, timeout, &mut buffers).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(done) if done.is_success() => CommandOutcome::Completed {
            stdout: done.stdout,
        },
        Ok(done) => CommandOutcome::failed(format!("exit code {}", done.exit_code), buffers),
        Err(e) => CommandOutcome::failed(e, buffers),
    }
}
