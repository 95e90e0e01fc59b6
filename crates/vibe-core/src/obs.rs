//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via `run_span`
//! - Emission functions for key lifecycle events: run start/finish, step
//!   execution and replay, tool invocations, network iterations, outcome
//!   persistence
//!
//! Every event carries an `event = "..."` field so log pipelines can filter
//! on it regardless of the message text.

use tracing::{info, warn};

/// Span tagging every event of one run with its `run_id`.
///
/// Returned un-entered so it can wrap a future that moves between worker
/// threads:
///
/// ```ignore
/// engine.execute(&run_id).instrument(run_span(&run_id.0)).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("vibe.run", run_id = %run_id)
}

/// Emit event: an attempt of the run started.
pub fn emit_run_started(run_id: &str, project_id: &str, attempt: u32) {
    info!(event = "run.started", run_id = %run_id, project_id = %project_id, attempt = attempt);
}

/// Emit event: run finished with duration and terminal status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, status: &str) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        status = %status,
    );
}

/// Emit event: a step body ran and its result was memoized.
pub fn emit_step_completed(run_id: &str, step_id: &str, duration_ms: u64) {
    info!(event = "step.completed", run_id = %run_id, step_id = %step_id, duration_ms = duration_ms);
}

/// Emit event: a step was served from the ledger without re-execution.
pub fn emit_step_memoized(run_id: &str, step_id: &str) {
    info!(event = "step.memoized", run_id = %run_id, step_id = %step_id);
}

/// Emit event: a step body failed (warning level).
pub fn emit_step_failed(run_id: &str, step_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "step.failed", run_id = %run_id, step_id = %step_id, error = %error);
}

/// Emit event: a tool call was dispatched.
pub fn emit_tool_invoked(run_id: &str, tool_name: &str, is_error: bool) {
    info!(event = "tool.invoked", run_id = %run_id, tool = %tool_name, is_error = is_error);
}

/// Emit event: the network started an agent turn.
pub fn emit_iteration(run_id: &str, agent: &str, iteration: u32, max_iterations: u32) {
    info!(
        event = "network.iteration",
        run_id = %run_id,
        agent = %agent,
        iteration = iteration,
        max_iterations = max_iterations,
    );
}

/// Emit event: the outcome record was written (or found already written).
pub fn emit_outcome_persisted(run_id: &str, kind: &str) {
    info!(event = "outcome.persisted", run_id = %run_id, kind = %kind);
}
