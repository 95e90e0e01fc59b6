//! Memoized step execution.
//!
//! A [`StepContext`] wraps one attempt of one run. Every effectful unit of
//! work goes through [`StepContext::run`], which either returns the result
//! recorded by an earlier attempt or executes the body and records its
//! result before returning.
//!
//! Step ids are derived from the step name and its occurrence count within
//! the attempt: the first `terminal` step is `terminal`, the second is
//! `terminal:1`, and so on. Because a replayed attempt re-issues steps in
//! the same order (model turns are themselves memoized), the ids line up
//! with the ledger rows of the previous attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use vibe_state::{RunId, StepLedger, StepRecord};

use super::error::{StepError, StepResult};
use crate::metrics::METRICS;
use crate::obs;

/// Per-attempt handle to the step ledger of a run.
pub struct StepContext {
    run_id: RunId,
    ledger: Arc<dyn StepLedger>,
    occurrences: Mutex<HashMap<String, u32>>,
}

impl StepContext {
    pub fn new(run_id: RunId, ledger: Arc<dyn StepLedger>) -> Self {
        Self {
            run_id,
            ledger,
            occurrences: Mutex::new(HashMap::new()),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Allocate the id for the next occurrence of `name`.
    fn next_id(&self, name: &str) -> String {
        let mut occurrences = self
            .occurrences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let n = occurrences.entry(name.to_string()).or_insert(0);
        let id = if *n == 0 {
            name.to_string()
        } else {
            format!("{name}:{n}")
        };
        *n += 1;
        id
    }

    /// Run `body` as the step `name`, or return its memoized result.
    ///
    /// On success the output is recorded with insert-if-absent semantics and
    /// the recorded value is returned, so concurrent executors of the same
    /// step all observe the first writer's result. On failure the error is
    /// recorded and returned as [`StepError::Failed`].
    pub async fn run<T, E, F, Fut>(&self, name: &str, body: F) -> StepResult<T>
    where
        T: Serialize + DeserializeOwned,
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let step_id = self.next_id(name);

        if let Some(record) = self.ledger.get_step(&self.run_id, &step_id).await? {
            if record.is_completed() {
                record.verify()?;
                METRICS.inc_steps_replayed();
                obs::emit_step_memoized(&self.run_id.0, &step_id);
                return Self::decode(&step_id, record);
            }
            debug!(
                run_id = %self.run_id,
                step_id = %step_id,
                failures = record.failures,
                "re-executing previously failed step"
            );
        }

        let started = Instant::now();
        METRICS.inc_steps_executed();
        match body().await {
            Ok(value) => {
                let json = serde_json::to_value(&value).map_err(|e| StepError::Codec {
                    step_id: step_id.clone(),
                    reason: e.to_string(),
                })?;
                let record = self
                    .ledger
                    .complete_step(&self.run_id, &step_id, json)
                    .await?;
                obs::emit_step_completed(
                    &self.run_id.0,
                    &step_id,
                    started.elapsed().as_millis() as u64,
                );
                Self::decode(&step_id, record)
            }
            Err(e) => {
                let reason = e.to_string();
                obs::emit_step_failed(&self.run_id.0, &step_id, &reason);
                self.ledger
                    .record_failure(&self.run_id, &step_id, &reason)
                    .await?;
                Err(StepError::Failed { step_id, reason })
            }
        }
    }

    fn decode<T: DeserializeOwned>(step_id: &str, record: StepRecord) -> StepResult<T> {
        let output = record.output.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(output).map_err(|e| StepError::Codec {
            step_id: step_id.to_string(),
            reason: e.to_string(),
        })
    }
}
