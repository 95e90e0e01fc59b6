//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryStepLedger`, `MemoryRunStore`, and `MemoryOutcomeStore`
//! that satisfy the trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryStepLedger
// ---------------------------------------------------------------------------

/// In-memory step ledger. Records keep insertion order per run.
#[derive(Debug, Default)]
pub struct MemoryStepLedger {
    steps: Mutex<HashMap<String, Vec<StepRecord>>>,
}

impl MemoryStepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a memoized output without updating its digest.
    ///
    /// Lets tests simulate a corrupted row.
    pub fn tamper(&self, run_id: &RunId, step_id: &str, output: serde_json::Value) {
        let mut steps = lock(&self.steps);
        if let Some(record) = steps
            .get_mut(&run_id.0)
            .and_then(|v| v.iter_mut().find(|r| r.step_id == step_id))
        {
            record.output = Some(output);
        }
    }
}

#[async_trait]
impl StepLedger for MemoryStepLedger {
    async fn get_step(&self, run_id: &RunId, step_id: &str) -> StorageResult<Option<StepRecord>> {
        let steps = lock(&self.steps);
        Ok(steps
            .get(&run_id.0)
            .and_then(|v| v.iter().find(|r| r.step_id == step_id))
            .cloned())
    }

    async fn complete_step(
        &self,
        run_id: &RunId,
        step_id: &str,
        output: serde_json::Value,
    ) -> StorageResult<StepRecord> {
        let digest = ContentDigest::of_json(&output)?;
        let mut steps = lock(&self.steps);
        let run_steps = steps.entry(run_id.0.clone()).or_default();

        if let Some(existing) = run_steps.iter_mut().find(|r| r.step_id == step_id) {
            if existing.is_completed() {
                return Ok(existing.clone());
            }
            existing.status = StepStatus::Completed;
            existing.output = Some(output);
            existing.output_digest = Some(digest);
            existing.completed_at = Some(Utc::now());
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let record = StepRecord {
            run_id: run_id.clone(),
            step_id: step_id.to_string(),
            status: StepStatus::Completed,
            output: Some(output),
            output_digest: Some(digest),
            failures: 0,
            last_error: None,
            created_at: now,
            completed_at: Some(now),
        };
        run_steps.push(record.clone());
        Ok(record)
    }

    async fn record_failure(
        &self,
        run_id: &RunId,
        step_id: &str,
        error: &str,
    ) -> StorageResult<StepRecord> {
        let mut steps = lock(&self.steps);
        let run_steps = steps.entry(run_id.0.clone()).or_default();

        if let Some(existing) = run_steps.iter_mut().find(|r| r.step_id == step_id) {
            if !existing.is_completed() {
                existing.failures += 1;
                existing.last_error = Some(error.to_string());
            }
            return Ok(existing.clone());
        }

        let record = StepRecord {
            run_id: run_id.clone(),
            step_id: step_id.to_string(),
            status: StepStatus::Failed,
            output: None,
            output_digest: None,
            failures: 1,
            last_error: Some(error.to_string()),
            created_at: Utc::now(),
            completed_at: None,
        };
        run_steps.push(record.clone());
        Ok(record)
    }

    async fn list_steps(&self, run_id: &RunId) -> StorageResult<Vec<StepRecord>> {
        let steps = lock(&self.steps);
        Ok(steps.get(&run_id.0).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryRunStore
// ---------------------------------------------------------------------------

/// In-memory run store backed by a `HashMap<RunId, RunRecord>`.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: NewRun) -> StorageResult<RunRecord> {
        let record = RunRecord {
            run_id: RunId::new(),
            project_id: run.project_id,
            input: run.input,
            status: RunStatus::Pending,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        lock(&self.runs).insert(record.run_id.0.clone(), record.clone());
        Ok(record)
    }

    async fn mark_running(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let mut runs = lock(&self.runs);
        let record = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        if record.status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: record.status.to_string(),
                expected: "PENDING or RUNNING".to_string(),
            });
        }
        record.status = RunStatus::Running;
        record.attempts += 1;
        if record.started_at.is_none() {
            record.started_at = Some(Utc::now());
        }
        Ok(record.clone())
    }

    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        error: Option<String>,
    ) -> StorageResult<RunRecord> {
        let mut runs = lock(&self.runs);
        let record = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        if record.status.is_terminal() || !status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: record.status.to_string(),
                expected: "a non-terminal run finishing into SUCCEEDED or FAILED".to_string(),
            });
        }
        record.status = status;
        record.error = error;
        record.finished_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        lock(&self.runs)
            .get(&run_id.0)
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn list_runs(&self, project_id: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let runs = lock(&self.runs);
        let mut result: Vec<RunRecord> = runs
            .values()
            .filter(|r| project_id.map_or(true, |p| r.project_id == p))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// MemoryOutcomeStore
// ---------------------------------------------------------------------------

/// In-memory outcome store, at most one outcome per run.
#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    outcomes: Mutex<Vec<OutcomeRecord>>,
    fail_next: AtomicUsize,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` inserts fail with a backend error.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of stored outcomes across all runs.
    pub fn len(&self) -> usize {
        lock(&self.outcomes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn insert_outcome(&self, outcome: NewOutcome) -> StorageResult<OutcomeRecord> {
        check_outcome(&outcome)?;

        let pending_failures = self.fail_next.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next.store(pending_failures - 1, Ordering::SeqCst);
            return Err(StorageError::Backend("injected insert failure".to_string()));
        }

        let mut outcomes = lock(&self.outcomes);
        if let Some(existing) = outcomes.iter().find(|o| o.run_id == outcome.run_id) {
            return Ok(existing.clone());
        }
        let record = OutcomeRecord {
            outcome_id: uuid::Uuid::new_v4().to_string(),
            run_id: outcome.run_id,
            project_id: outcome.project_id,
            content: outcome.content,
            role: outcome.role,
            kind: outcome.kind,
            fragment: outcome.fragment,
            created_at: Utc::now(),
        };
        outcomes.push(record.clone());
        Ok(record)
    }

    async fn outcome_for_run(&self, run_id: &RunId) -> StorageResult<Option<OutcomeRecord>> {
        Ok(lock(&self.outcomes)
            .iter()
            .find(|o| &o.run_id == run_id)
            .cloned())
    }

    async fn list_for_project(&self, project_id: &str) -> StorageResult<Vec<OutcomeRecord>> {
        Ok(lock(&self.outcomes)
            .iter()
            .filter(|o| o.project_id == project_id)
            .cloned()
            .collect())
    }
}
