//! Storage trait definitions for vibe
//!
//! These traits define the durable state behind a run:
//! - `StepLedger`: memoized step results keyed by (run id, step id)
//! - `RunStore`: run records and their PENDING → RUNNING → terminal lifecycle
//! - `OutcomeStore`: the single persisted outcome of each run
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes` / `of_json` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    pub fn of_json(value: &serde_json::Value) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// StepLedger — memoized step results
// ---------------------------------------------------------------------------

/// Lifecycle of a step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step has a memoized output; it never runs again for this run.
    Completed,
    /// Every attempt so far failed; the next attempt re-executes the step.
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(StorageError::Backend(format!("unknown step status: {other}"))),
        }
    }
}

/// One row of the step ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: RunId,
    /// Stable id, unique within the run (e.g. `terminal`, `terminal:2`).
    pub step_id: String,
    pub status: StepStatus,
    /// Memoized output; present iff `status == Completed`.
    pub output: Option<serde_json::Value>,
    /// SHA-256 of the serialized output.
    pub output_digest: Option<ContentDigest>,
    /// Number of failed executions recorded before completion.
    pub failures: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Returns `true` once the output is memoized.
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// Check that the memoized output still matches its recorded digest.
    pub fn verify(&self) -> StorageResult<()> {
        let corrupt = |reason: &str| StorageError::CorruptStep {
            run_id: self.run_id.0.clone(),
            step_id: self.step_id.clone(),
            reason: reason.to_string(),
        };
        match (&self.output, &self.output_digest) {
            (Some(output), Some(expected)) => {
                let actual = ContentDigest::of_json(output)?;
                if &actual != expected {
                    return Err(corrupt("output digest mismatch"));
                }
                Ok(())
            }
            (None, None) if self.status == StepStatus::Failed => Ok(()),
            _ => Err(corrupt("output and digest must be recorded together")),
        }
    }
}

/// Durable memo table for step results.
///
/// Guarantees:
/// - `complete_step` is insert-if-absent: the first completed output for a
///   (run, step) pair wins and every later caller receives that same record.
/// - `record_failure` never overwrites a completed record.
/// - `list_steps` returns records in creation order.
#[async_trait]
pub trait StepLedger: Send + Sync {
    /// Look up a step. `None` if it never ran.
    async fn get_step(&self, run_id: &RunId, step_id: &str) -> StorageResult<Option<StepRecord>>;

    /// Memoize `output` for the step, returning the winning record.
    async fn complete_step(
        &self,
        run_id: &RunId,
        step_id: &str,
        output: serde_json::Value,
    ) -> StorageResult<StepRecord>;

    /// Record a failed execution without memoizing anything.
    async fn record_failure(
        &self,
        run_id: &RunId,
        step_id: &str,
        error: &str,
    ) -> StorageResult<StepRecord>;

    /// All steps of a run, in creation order.
    async fn list_steps(&self, run_id: &RunId) -> StorageResult<Vec<StepRecord>>;
}

// ---------------------------------------------------------------------------
// RunStore — run lifecycle
// ---------------------------------------------------------------------------

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Terminal runs are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(StorageError::Backend(format!("unknown run status: {other}"))),
        }
    }
}

/// Input needed to create a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub project_id: String,
    /// The user's request text.
    pub input: String,
}

/// Full run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub project_id: String,
    pub input: String,
    pub status: RunStatus,
    /// Number of attempts started so far.
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Run lifecycle store.
///
/// Guarantees:
/// - A run transitions PENDING → RUNNING → SUCCEEDED | FAILED.
/// - `mark_running` may be called once per attempt; it bumps `attempts`.
/// - Terminal runs are immutable.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a PENDING run.
    async fn create_run(&self, run: NewRun) -> StorageResult<RunRecord>;

    /// Start an attempt: PENDING | RUNNING → RUNNING, `attempts += 1`.
    async fn mark_running(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Move a non-terminal run into a terminal status.
    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        error: Option<String>,
    ) -> StorageResult<RunRecord>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// List runs, newest first, optionally filtered by project.
    async fn list_runs(&self, project_id: Option<&str>) -> StorageResult<Vec<RunRecord>>;
}

// ---------------------------------------------------------------------------
// OutcomeStore — persisted outcomes
// ---------------------------------------------------------------------------

/// Author of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "USER",
            MessageRole::Assistant => "ASSISTANT",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "USER" => Ok(MessageRole::User),
            "ASSISTANT" => Ok(MessageRole::Assistant),
            other => Err(StorageError::Backend(format!("unknown role: {other}"))),
        }
    }
}

/// Whether an outcome carries a result or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeKind {
    Result,
    Error,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Result => "RESULT",
            OutcomeKind::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for OutcomeKind {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "RESULT" => Ok(OutcomeKind::Result),
            "ERROR" => Ok(OutcomeKind::Error),
            other => Err(StorageError::Backend(format!("unknown outcome type: {other}"))),
        }
    }
}

/// Artifact attached to a successful outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

/// Outcome to be persisted for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutcome {
    pub run_id: RunId,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    pub kind: OutcomeKind,
    pub fragment: Option<Fragment>,
}

/// A persisted outcome row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub outcome_id: String,
    pub run_id: RunId,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    pub kind: OutcomeKind,
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
}

/// Outcome store.
///
/// Guarantees:
/// - At most one outcome per run id: inserting a second outcome for the same
///   run returns the existing record unchanged.
/// - An ERROR outcome never carries a fragment.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Insert the outcome of a run, or return the one already stored.
    async fn insert_outcome(&self, outcome: NewOutcome) -> StorageResult<OutcomeRecord>;

    /// The outcome of a run, if persisted.
    async fn outcome_for_run(&self, run_id: &RunId) -> StorageResult<Option<OutcomeRecord>>;

    /// All outcomes of a project, oldest first.
    async fn list_for_project(&self, project_id: &str) -> StorageResult<Vec<OutcomeRecord>>;
}

/// Reject outcomes that attach an artifact to an error.
pub(crate) fn check_outcome(outcome: &NewOutcome) -> StorageResult<()> {
    if outcome.kind == OutcomeKind::Error && outcome.fragment.is_some() {
        return Err(StorageError::InvalidRunState {
            run_id: outcome.run_id.0.clone(),
            status: "ERROR outcome with fragment".to_string(),
            expected: "ERROR outcome without fragment".to_string(),
        });
    }
    Ok(())
}
