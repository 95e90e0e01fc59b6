//! Sandbox tools exposed to the coding agent.
//!
//! Tools form a closed set dispatched by name. Arguments are validated
//! before anything runs; an invalid call fails closed with a
//! `SchemaValidation` message returned to the model. Each sandbox operation
//! runs as its own memoized step, and side effects on the [`RunState`] are
//! applied in call order after the step result is known.

pub mod error;
pub mod files;
pub mod schema;
pub mod terminal;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::instrument;

pub use error::{ToolError, ToolResult};
pub use files::{ReadOutcome, WriteOutcome};
pub use schema::{
    tool_specs, CreateOrUpdateFilesArgs, FileEntry, JsonFieldSchema, ReadFilesArgs, TerminalArgs,
    Tool, ToolSpec, CREATE_OR_UPDATE_FILES, READ_FILES, TERMINAL,
};
pub use terminal::CommandOutcome;

use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::SandboxProvider;
use crate::state::RunState;
use crate::step::{StepContext, StepResult};

/// Result of one tool call, as fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub output: String,
    pub is_error: bool,
}

/// The tools of one run, bound to its sandbox.
#[derive(Clone)]
pub struct ToolSet {
    provider: Arc<dyn SandboxProvider>,
    sandbox_id: String,
    command_timeout: Duration,
}

impl ToolSet {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        sandbox_id: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            sandbox_id: sandbox_id.into(),
            command_timeout,
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub fn specs() -> Vec<ToolSpec> {
        tool_specs()
    }

    /// Validate and run one tool call.
    ///
    /// Only ledger faults surface as errors; everything that goes wrong
    /// inside the sandbox is reported to the model as tool text.
    #[instrument(skip(self, ctx, state, arguments), fields(run_id = %ctx.run_id()))]
    pub async fn execute(
        &self,
        ctx: &StepContext,
        state: &mut RunState,
        name: &str,
        arguments: &Value,
    ) -> StepResult<ToolOutcome> {
        METRICS.inc_tool_calls();
        let tool = match Tool::parse(name, arguments) {
            Ok(tool) => tool,
            Err(e) => {
                obs::emit_tool_invoked(&ctx.run_id().0, name, true);
                return Ok(ToolOutcome {
                    tool_name: name.to_string(),
                    output: e.to_string(),
                    is_error: true,
                });
            }
        };

        let provider = self.provider.as_ref();
        let sandbox_id = self.sandbox_id.as_str();
        let (output, is_error) = match &tool {
            Tool::Terminal(args) => {
                let timeout = self.command_timeout;
                let outcome: CommandOutcome = ctx
                    .run(TERMINAL, || async move {
                        Ok::<_, Infallible>(
                            terminal::run_terminal(provider, sandbox_id, &args.command, timeout)
                                .await,
                        )
                    })
                    .await?;
                (outcome.reply(), outcome.is_failure())
            }
            Tool::CreateOrUpdateFiles(args) => {
                let outcome: WriteOutcome = ctx
                    .run(CREATE_OR_UPDATE_FILES, || async move {
                        Ok::<_, Infallible>(
                            files::write_files(provider, sandbox_id, &args.files).await,
                        )
                    })
                    .await?;
                let reply = outcome.reply();
                match outcome {
                    WriteOutcome::Written { files } => {
                        state.merge_files(files);
                        (reply, false)
                    }
                    WriteOutcome::Failed { .. } => (reply, true),
                }
            }
            Tool::ReadFiles(args) => {
                let outcome: ReadOutcome = ctx
                    .run(READ_FILES, || async move {
                        Ok::<_, Infallible>(
                            files::read_files(provider, sandbox_id, &args.files).await,
                        )
                    })
                    .await?;
                (outcome.reply(), outcome.is_failure())
            }
        };

        obs::emit_tool_invoked(&ctx.run_id().0, tool.name(), is_error);
        Ok(ToolOutcome {
            tool_name: tool.name().to_string(),
            output,
            is_error,
        })
    }
}
