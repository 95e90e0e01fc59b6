//! The code-agent run engine.
//!
//! `submit` validates a request and creates a PENDING run. `execute` drives
//! the run to a terminal status:
//!
//! 1. `get-sandbox-id`: provision the sandbox once per run
//! 2. the network loop over the coding agent, each turn memoized
//! 3. `get-sandbox-url`: re-resolve the sandbox and derive the preview URL
//! 4. optional title and response generation
//! 5. `save-result`: persist exactly one outcome, then finish the run
//!
//! Each attempt starts a fresh [`StepContext`] over the same ledger, so a
//! retried or resumed run replays completed steps instead of repeating them.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn, Instrument};
use vibe_state::fakes::{MemoryOutcomeStore, MemoryRunStore, MemoryStepLedger};
use vibe_state::{
    Fragment, NewRun, OutcomeKind, OutcomeRecord, OutcomeStore, RunId, RunRecord, RunStatus,
    RunStore, StepLedger, StorageError, SurrealLedger,
};

use crate::agent::Agent;
use crate::config::EngineConfig;
use crate::domain::{validate_request, RunOutput, RunRequest, DEFAULT_TITLE};
use crate::error::{RunError, RunResult};
use crate::fragment;
use crate::metrics::METRICS;
use crate::model::LanguageModel;
use crate::network::{Completion, Network};
use crate::obs;
use crate::sandbox::SandboxProvider;
use crate::sink::{ResultSink, Verdict};
use crate::state::RunState;
use crate::step::{RetryPolicy, StepContext, StepError};
use crate::tools::ToolSet;

pub const GET_SANDBOX_ID_STEP: &str = "get-sandbox-id";
pub const GET_SANDBOX_URL_STEP: &str = "get-sandbox-url";
pub const RUN_OUTPUT_STEP: &str = "run-output";

/// Run error recorded when the agent finished without writing any file.
pub const NO_FILES_ERROR: &str = "agent finished without producing files";

/// Run error recorded when an earlier execution already persisted an ERROR
/// outcome and this one has no error of its own.
pub const PERSISTED_ERROR: &str = "an error outcome was already persisted for this run";

/// Time left for a run under `limit`, counted from its first start.
///
/// A run that never started gets the whole limit; a resumed run only gets
/// what its earlier executions left over. `None` once the limit is spent.
pub fn remaining_budget(run: &RunRecord, limit: Duration, now: DateTime<Utc>) -> Option<Duration> {
    let Some(started_at) = run.started_at else {
        return Some(limit);
    };
    let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
    limit.checked_sub(elapsed).filter(|left| !left.is_zero())
}

/// Rebuild the return value from a RESULT outcome.
fn output_from_outcome(outcome: &OutcomeRecord) -> Option<RunOutput> {
    outcome.fragment.as_ref().map(|fragment| RunOutput {
        url: fragment.sandbox_url.clone(),
        title: fragment.title.clone(),
        files: fragment.files.clone(),
        summary: Some(outcome.content.clone()),
    })
}

/// The three stores a run needs.
#[derive(Clone)]
pub struct EngineStores {
    pub steps: Arc<dyn StepLedger>,
    pub runs: Arc<dyn RunStore>,
    pub outcomes: Arc<dyn OutcomeStore>,
}

impl EngineStores {
    /// Fresh in-memory stores.
    pub fn memory() -> Self {
        Self {
            steps: Arc::new(MemoryStepLedger::new()),
            runs: Arc::new(MemoryRunStore::new()),
            outcomes: Arc::new(MemoryOutcomeStore::new()),
        }
    }

    /// All three stores over one SurrealDB connection.
    pub fn surreal(ledger: SurrealLedger) -> Self {
        let ledger = Arc::new(ledger);
        Self {
            steps: ledger.clone(),
            runs: ledger.clone(),
            outcomes: ledger,
        }
    }
}

/// Final view of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run: RunRecord,
    pub outcome: Option<OutcomeRecord>,
    /// Present for succeeded runs.
    pub output: Option<RunOutput>,
}

/// What a successful attempt produced.
struct Finished {
    state: RunState,
    url: String,
    title: String,
    response: Option<String>,
}

/// Drives code-agent runs.
#[derive(Clone)]
pub struct CodeAgentEngine {
    config: Arc<EngineConfig>,
    sandboxes: Arc<dyn SandboxProvider>,
    model: Arc<dyn LanguageModel>,
    stores: EngineStores,
    sink: ResultSink,
}

impl CodeAgentEngine {
    pub fn new(
        config: EngineConfig,
        sandboxes: Arc<dyn SandboxProvider>,
        model: Arc<dyn LanguageModel>,
        stores: EngineStores,
    ) -> Self {
        let sink = ResultSink::new(stores.outcomes.clone());
        Self {
            config: Arc::new(config),
            sandboxes,
            model,
            stores,
            sink,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stores(&self) -> &EngineStores {
        &self.stores
    }

    /// Validate `request` and create a PENDING run.
    pub async fn submit(&self, request: RunRequest) -> RunResult<RunRecord> {
        let request = validate_request(&request)?;
        let run = self
            .stores
            .runs
            .create_run(NewRun {
                project_id: request.project_id,
                input: request.value,
            })
            .await?;
        info!(run_id = %run.run_id, project_id = %run.project_id, "run submitted");
        Ok(run)
    }

    /// Submit and execute in one call.
    pub async fn run(&self, request: RunRequest) -> RunResult<RunReport> {
        let run = self.submit(request).await?;
        self.execute(&run.run_id).await
    }

    /// Drive a run to a terminal status.
    ///
    /// Terminal runs are reported from storage without executing anything.
    /// Run failures end up in the report (FAILED run, ERROR outcome); only
    /// storage faults and an unpersistable outcome are returned as errors.
    pub async fn execute(&self, run_id: &RunId) -> RunResult<RunReport> {
        self.execute_inner(run_id)
            .instrument(obs::run_span(&run_id.0))
            .await
    }

    async fn execute_inner(&self, run_id: &RunId) -> RunResult<RunReport> {
        let run = self.stores.runs.get_run(run_id).await?;
        if run.status.is_terminal() {
            return self.report(run).await;
        }

        let started = Instant::now();
        let result = match remaining_budget(&run, self.config.run_timeout, Utc::now()) {
            Some(budget) => {
                let policy = RetryPolicy::new(self.config.max_attempts, self.config.backoff_base);
                let attempts =
                    policy.run(RunError::is_retryable, |attempt| self.attempt(&run, attempt));
                match tokio::time::timeout(budget, attempts).await {
                    Ok(result) => result,
                    Err(_) => Err(self.run_timeout()),
                }
            }
            None => Err(self.run_timeout()),
        };

        let (verdict, output, error) = match result {
            Ok(finished) if !finished.state.is_error() => {
                let summary = finished.state.summary.clone().unwrap_or_default();
                let fragment = Fragment {
                    sandbox_url: finished.url.clone(),
                    title: finished.title.clone(),
                    files: finished.state.files.clone(),
                };
                let output = RunOutput {
                    url: finished.url,
                    title: finished.title,
                    files: finished.state.files,
                    summary: finished.state.summary,
                };
                let content = finished.response.unwrap_or(summary);
                (Verdict::Success { content, fragment }, Some(output), None)
            }
            Ok(_) => (Verdict::Failure, None, Some(NO_FILES_ERROR.to_string())),
            Err(e) => {
                warn!(run_id = %run.run_id, kind = e.kind(), error = %e, "run failed");
                (Verdict::Failure, None, Some(e.to_string()))
            }
        };

        let outcome = self.persist_outcome(&run, verdict).await?;

        // An earlier execution may already have persisted the outcome; the
        // stored record decides the terminal status.
        let (status, output, error) = match outcome.kind {
            OutcomeKind::Result => {
                let output = output.or_else(|| output_from_outcome(&outcome));
                if let Some(output) = output.clone() {
                    self.memoize_output(&run, output).await?;
                }
                (RunStatus::Succeeded, output, None)
            }
            OutcomeKind::Error => (
                RunStatus::Failed,
                None,
                error.or_else(|| Some(PERSISTED_ERROR.to_string())),
            ),
        };
        let run = self.stores.runs.finish_run(&run.run_id, status, error).await?;

        match run.status {
            RunStatus::Succeeded => METRICS.inc_runs_succeeded(),
            _ => METRICS.inc_runs_failed(),
        }
        obs::emit_run_finished(
            &run.run_id.0,
            started.elapsed().as_millis() as u64,
            run.status.as_str(),
        );
        METRICS.flush();

        Ok(RunReport {
            run,
            outcome: Some(outcome),
            output,
        })
    }

    fn run_timeout(&self) -> RunError {
        RunError::RunTimeout {
            limit_secs: self.config.run_timeout.as_secs(),
        }
    }

    /// One attempt of the run, replaying whatever earlier attempts completed.
    #[instrument(skip(self, run), fields(run_id = %run.run_id))]
    async fn attempt(&self, run: &RunRecord, attempt: u32) -> RunResult<Finished> {
        self.stores.runs.mark_running(&run.run_id).await?;
        obs::emit_run_started(&run.run_id.0, &run.project_id, attempt);

        let cfg = &self.config;
        let ctx = StepContext::new(run.run_id.clone(), self.stores.steps.clone());
        let sandboxes = self.sandboxes.as_ref();
        let model = self.model.as_ref();

        let sandbox_id: String = ctx
            .run(GET_SANDBOX_ID_STEP, || async {
                sandboxes
                    .create(&cfg.sandbox_template, cfg.sandbox_timeout)
                    .await
            })
            .await?;

        let tools = ToolSet::new(self.sandboxes.clone(), sandbox_id.clone(), cfg.command_timeout);
        let mut state = RunState::new();
        let network = Network::new(self.agent(Agent::code_agent()), cfg.max_iterations);
        let result = network
            .run(&ctx, model, &tools, &run.input, &mut state)
            .await?;
        if result.completion == Completion::Exhausted {
            return Err(RunError::IterationExhausted {
                iterations: result.iterations,
            });
        }

        let url: String = ctx
            .run(GET_SANDBOX_URL_STEP, || async {
                let sandbox = sandboxes.connect(&sandbox_id).await?;
                sandbox.preview_url(cfg.preview_port).await
            })
            .await?;

        let mut title = DEFAULT_TITLE.to_string();
        let mut response = None;
        if cfg.generate_titles && !state.is_error() {
            if let Some(summary) = state.summary.as_deref() {
                title = fragment::generate_title(
                    &ctx,
                    model,
                    &self.agent(Agent::title_agent()),
                    summary,
                )
                .await?;
                response = Some(
                    fragment::generate_response(
                        &ctx,
                        model,
                        &self.agent(Agent::response_agent()),
                        summary,
                    )
                    .await?,
                );
            }
        }

        Ok(Finished {
            state,
            url,
            title,
            response,
        })
    }

    fn agent(&self, agent: Agent) -> Agent {
        agent.with_inference_retry(RetryPolicy::new(2, self.config.backoff_base))
    }

    /// Persist the outcome, retrying storage faults.
    async fn persist_outcome(
        &self,
        run: &RunRecord,
        verdict: Verdict,
    ) -> RunResult<OutcomeRecord> {
        let policy = RetryPolicy::new(self.config.max_attempts, self.config.backoff_base);
        let outcome = policy
            .run(
                |_: &StepError| true,
                |_| {
                    let verdict = verdict.clone();
                    async move {
                        let ctx = StepContext::new(run.run_id.clone(), self.stores.steps.clone());
                        self.sink.persist(&ctx, run, verdict).await
                    }
                },
            )
            .await?;
        Ok(outcome)
    }

    /// Record the return value of a succeeded run.
    async fn memoize_output(&self, run: &RunRecord, output: RunOutput) -> RunResult<()> {
        let ctx = StepContext::new(run.run_id.clone(), self.stores.steps.clone());
        let _: RunOutput = ctx
            .run(RUN_OUTPUT_STEP, || async move { Ok::<_, Infallible>(output) })
            .await?;
        Ok(())
    }

    /// Report a terminal run from storage.
    async fn report(&self, run: RunRecord) -> RunResult<RunReport> {
        let outcome = self.stores.outcomes.outcome_for_run(&run.run_id).await?;
        let output = match self
            .stores
            .steps
            .get_step(&run.run_id, RUN_OUTPUT_STEP)
            .await?
        {
            Some(record) if record.is_completed() => {
                record.verify()?;
                let value = record.output.unwrap_or_default();
                Some(serde_json::from_value(value).map_err(StorageError::from)?)
            }
            _ => None,
        };
        Ok(RunReport {
            run,
            outcome,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(started_at: Option<DateTime<Utc>>) -> RunRecord {
        let created_at = Utc::now();
        RunRecord {
            run_id: RunId("run-1".into()),
            project_id: "proj".into(),
            input: "build a page".into(),
            status: RunStatus::Running,
            attempts: 1,
            error: None,
            created_at,
            started_at,
            finished_at: None,
        }
    }

    #[test]
    fn unstarted_run_gets_the_whole_limit() {
        let limit = Duration::from_secs(60);
        assert_eq!(remaining_budget(&run(None), limit, Utc::now()), Some(limit));
    }

    #[test]
    fn resumed_run_gets_what_is_left() {
        let now = Utc::now();
        let started = now - chrono::Duration::seconds(45);
        let left = remaining_budget(&run(Some(started)), Duration::from_secs(60), now);
        assert_eq!(left, Some(Duration::from_secs(15)));
    }

    #[test]
    fn spent_limit_leaves_nothing() {
        let now = Utc::now();
        let started = now - chrono::Duration::seconds(60);
        let limit = Duration::from_secs(60);
        assert_eq!(remaining_budget(&run(Some(started)), limit, now), None);
        let long_ago = now - chrono::Duration::hours(2);
        assert_eq!(remaining_budget(&run(Some(long_ago)), limit, now), None);
    }

    #[test]
    fn clock_skew_does_not_extend_the_limit() {
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(30);
        let limit = Duration::from_secs(60);
        assert_eq!(remaining_budget(&run(Some(future)), limit, now), Some(limit));
    }
}
