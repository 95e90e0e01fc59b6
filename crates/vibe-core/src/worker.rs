//! Event intake: run `code-agent/run` events with bounded concurrency.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use vibe_state::RunId;

use crate::engine::{CodeAgentEngine, RunReport};
use crate::domain::TriggerEvent;
use crate::error::RunError;

/// What happened to one inbound event.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The run reached a terminal status.
    Finished(Box<RunReport>),
    /// The request failed validation; no run was created.
    Rejected { reason: String },
    /// Not a `code-agent/run` event.
    Skipped { name: String },
    /// Execution stopped on a storage fault. The run stays non-terminal.
    Errored { run_id: RunId, error: RunError },
}

/// Consumes trigger events and executes runs under a concurrency ceiling.
pub struct RunWorker {
    engine: CodeAgentEngine,
    permits: Arc<Semaphore>,
}

impl RunWorker {
    pub fn new(engine: CodeAgentEngine) -> Self {
        let permits = Arc::new(Semaphore::new(engine.config().max_concurrent_runs.max(1)));
        Self { engine, permits }
    }

    /// Process events until the channel closes and every in-flight run is
    /// done, sending each [`WorkerEvent`] to `results` as it happens.
    ///
    /// No new event is taken while all permits are held, so at most
    /// `max_concurrent_runs` runs are in flight and finished tasks are
    /// reaped as they complete. Returns the number of events processed.
    #[instrument(skip_all, name = "run_worker")]
    pub async fn run(
        self,
        mut events: mpsc::Receiver<TriggerEvent>,
        results: mpsc::Sender<WorkerEvent>,
    ) -> usize {
        let mut tasks = JoinSet::new();
        let mut open = true;
        let mut processed = 0;

        loop {
            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(event) => {
                        processed += 1;
                        emit(&results, event).await;
                    }
                    Err(e) => error!(error = %e, "run task panicked"),
                },
                event = events.recv(), if open && self.permits.available_permits() > 0 => {
                    let Some(event) = event else {
                        open = false;
                        continue;
                    };
                    if let Some(immediate) = self.intake(event, &mut tasks).await {
                        processed += 1;
                        emit(&results, immediate).await;
                    }
                }
                else => break,
            }
        }
        info!(processed, "worker drained");
        processed
    }

    /// Submit one event and spawn its execution. Returns the event to report
    /// right away when no run was started.
    async fn intake(
        &self,
        event: TriggerEvent,
        tasks: &mut JoinSet<WorkerEvent>,
    ) -> Option<WorkerEvent> {
        if !event.is_code_agent_run() {
            debug!(name = %event.name, "skipping event");
            return Some(WorkerEvent::Skipped { name: event.name });
        }

        let run = match self.engine.submit(event.data).await {
            Ok(run) => run,
            Err(e) => {
                warn!(error = %e, "rejected run request");
                return Some(WorkerEvent::Rejected {
                    reason: e.to_string(),
                });
            }
        };

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed while the worker runs.
            Err(e) => {
                return Some(WorkerEvent::Errored {
                    run_id: run.run_id,
                    error: RunError::StepExecutionFailure {
                        step_id: "intake".to_string(),
                        reason: e.to_string(),
                    },
                })
            }
        };
        let engine = self.engine.clone();
        tasks.spawn(async move {
            let _permit = permit;
            match engine.execute(&run.run_id).await {
                Ok(report) => WorkerEvent::Finished(Box::new(report)),
                Err(error) => WorkerEvent::Errored {
                    run_id: run.run_id,
                    error,
                },
            }
        });
        None
    }
}

async fn emit(results: &mpsc::Sender<WorkerEvent>, event: WorkerEvent) {
    if results.send(event).await.is_err() {
        debug!("result receiver dropped");
    }
}
