//! SurrealDB-backed implementation of the storage traits
//!
//! Uses the rows in `schema` for persistence, converting to/from
//! `storage_traits` types at the boundary. One `SurrealLedger` implements
//! `StepLedger`, `RunStore` and `OutcomeStore` over a single connection.

use std::path::Path;

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, warn};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{FragmentRow, OutcomeRow, RunRow, StepRow};
use crate::storage_traits::{
    check_outcome, ContentDigest, Fragment, NewOutcome, NewRun, OutcomeRecord, OutcomeStore,
    RunId, RunRecord, RunStatus, RunStore, StepLedger, StepRecord, StepStatus, StorageResult,
};

const NAMESPACE: &str = "vibe";
const DATABASE: &str = "main";
const DEFAULT_DB_PATH: &str = ".vibe/db";

/// SurrealDB-backed step ledger, run store and outcome store.
#[derive(Clone)]
pub struct SurrealLedger {
    db: Surreal<Any>,
}

impl SurrealLedger {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `vibe/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Open (or create) an embedded on-disk database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://`, `ws://`).
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db)
            .await
            .map_err(|e| StateError::SchemaSetup(e.to_string()))?;

        info!("SurrealLedger connected ({})", url);
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// Uses `SURREALDB_URL` when set, otherwise local persistence in `.vibe/db`.
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }
        info!(
            "No SURREALDB_URL found, using local persistence: {}",
            DEFAULT_DB_PATH
        );
        Self::open(DEFAULT_DB_PATH).await
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_run(&self, rid: &str) -> StorageResult<RunRow> {
        let mut res = self
            .db
            .query("SELECT * FROM runs WHERE run_id = $rid")
            .bind(("rid", rid.to_string()))
            .await?;
        let rows: Vec<RunRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: rid.to_string(),
            })
    }

    async fn write_run(&self, mut row: RunRow) -> StorageResult<RunRow> {
        row.id = None;
        let rid = row.run_id.clone();
        self.db
            .query("UPDATE runs CONTENT $row WHERE run_id = $rid")
            .bind(("row", row.clone()))
            .bind(("rid", rid))
            .await?
            .check()?;
        Ok(row)
    }

    async fn fetch_step(&self, rid: &str, sid: &str) -> StorageResult<Option<StepRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM steps WHERE run_id = $rid AND step_id = $sid")
            .bind(("rid", rid.to_string()))
            .bind(("sid", sid.to_string()))
            .await?;
        let rows: Vec<StepRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_outcome(&self, rid: &str) -> StorageResult<Option<OutcomeRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM outcomes WHERE run_id = $rid")
            .bind(("rid", rid.to_string()))
            .await?;
        let rows: Vec<OutcomeRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    fn run_from_row(row: RunRow) -> StorageResult<RunRecord> {
        Ok(RunRecord {
            run_id: RunId(row.run_id),
            project_id: row.project_id,
            input: row.input,
            status: row.status.parse()?,
            attempts: row.attempts,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }

    fn step_from_row(row: StepRow) -> StorageResult<StepRecord> {
        let output = row
            .output_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StorageError::CorruptStep {
                run_id: row.run_id.clone(),
                step_id: row.step_id.clone(),
                reason: e.to_string(),
            })?;
        let record = StepRecord {
            run_id: RunId(row.run_id),
            step_id: row.step_id,
            status: row.status.parse()?,
            output,
            output_digest: row.output_digest.map(ContentDigest::try_from).transpose()?,
            failures: row.failures,
            last_error: row.last_error,
            created_at: row.created_at,
            completed_at: row.completed_at,
        };
        record.verify()?;
        Ok(record)
    }

    fn outcome_from_row(row: OutcomeRow) -> StorageResult<OutcomeRecord> {
        Ok(OutcomeRecord {
            outcome_id: row.outcome_id,
            run_id: RunId(row.run_id),
            project_id: row.project_id,
            content: row.content,
            role: row.role.parse()?,
            kind: row.kind.parse()?,
            fragment: row.fragment.map(|f| Fragment {
                sandbox_url: f.sandbox_url,
                title: f.title,
                files: f.files,
            }),
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// StepLedger
// ---------------------------------------------------------------------------

#[async_trait]
impl StepLedger for SurrealLedger {
    async fn get_step(&self, run_id: &RunId, step_id: &str) -> StorageResult<Option<StepRecord>> {
        self.fetch_step(&run_id.0, step_id)
            .await?
            .map(Self::step_from_row)
            .transpose()
    }

    async fn complete_step(
        &self,
        run_id: &RunId,
        step_id: &str,
        output: serde_json::Value,
    ) -> StorageResult<StepRecord> {
        let output_json = serde_json::to_string(&output)?;
        let digest = ContentDigest::of_json(&output)?;

        if let Some(mut row) = self.fetch_step(&run_id.0, step_id).await? {
            if row.status == StepStatus::Completed.as_str() {
                debug!(run_id = %run_id, step_id, "step already memoized");
                return Self::step_from_row(row);
            }
            row.id = None;
            row.status = StepStatus::Completed.as_str().to_string();
            row.output_json = Some(output_json);
            row.output_digest = Some(digest.as_str().to_string());
            row.completed_at = Some(chrono::Utc::now());
            self.db
                .query(
                    "UPDATE steps CONTENT $row \
                     WHERE run_id = $rid AND step_id = $sid AND status = 'failed'",
                )
                .bind(("row", row))
                .bind(("rid", run_id.0.clone()))
                .bind(("sid", step_id.to_string()))
                .await?
                .check()?;
        } else {
            let row = StepRow::completed(
                run_id.0.clone(),
                step_id.to_string(),
                output_json,
                digest.as_str().to_string(),
            );
            let created: Result<Option<StepRow>, surrealdb::Error> =
                self.db.create("steps").content(row).await;
            match created {
                Ok(Some(row)) => return Self::step_from_row(row),
                Ok(None) => {}
                // A concurrent writer may have won the unique index; the
                // re-fetch below returns its record.
                Err(e) => warn!(run_id = %run_id, step_id, error = %e, "step insert rejected"),
            }
        }

        self.fetch_step(&run_id.0, step_id)
            .await?
            .filter(|row| row.status == StepStatus::Completed.as_str())
            .map(Self::step_from_row)
            .transpose()?
            .ok_or_else(|| {
                StorageError::Backend(format!("step {step_id} of run {run_id} was not memoized"))
            })
    }

    async fn record_failure(
        &self,
        run_id: &RunId,
        step_id: &str,
        error: &str,
    ) -> StorageResult<StepRecord> {
        if let Some(mut row) = self.fetch_step(&run_id.0, step_id).await? {
            if row.status == StepStatus::Completed.as_str() {
                return Self::step_from_row(row);
            }
            row.id = None;
            row.failures += 1;
            row.last_error = Some(error.to_string());
            self.db
                .query(
                    "UPDATE steps CONTENT $row \
                     WHERE run_id = $rid AND step_id = $sid AND status = 'failed'",
                )
                .bind(("row", row))
                .bind(("rid", run_id.0.clone()))
                .bind(("sid", step_id.to_string()))
                .await?
                .check()?;
        } else {
            let row = StepRow::failed(run_id.0.clone(), step_id.to_string(), error.to_string());
            let _created: Option<StepRow> = self.db.create("steps").content(row).await?;
        }

        self.fetch_step(&run_id.0, step_id)
            .await?
            .map(Self::step_from_row)
            .transpose()?
            .ok_or_else(|| StorageError::Backend(format!("step {step_id} of run {run_id} vanished")))
    }

    async fn list_steps(&self, run_id: &RunId) -> StorageResult<Vec<StepRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM steps WHERE run_id = $rid ORDER BY created_at ASC")
            .bind(("rid", run_id.0.clone()))
            .await?;
        let rows: Vec<StepRow> = res.take(0)?;
        rows.into_iter().map(Self::step_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

#[async_trait]
impl RunStore for SurrealLedger {
    async fn create_run(&self, run: NewRun) -> StorageResult<RunRecord> {
        let run_id = RunId::new();
        let row = RunRow::new(run_id.0.clone(), run.project_id, run.input);

        debug!(run_id = %run_id, "creating run");

        let created: Option<RunRow> = self.db.create("runs").content(row).await?;
        let row = created.ok_or_else(|| StorageError::Backend("run insert returned nothing".into()))?;
        Self::run_from_row(row)
    }

    async fn mark_running(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let mut row = self.fetch_run(&run_id.0).await?;
        let status: RunStatus = row.status.parse()?;
        if status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: row.status,
                expected: "PENDING or RUNNING".to_string(),
            });
        }
        row.status = RunStatus::Running.as_str().to_string();
        row.attempts += 1;
        if row.started_at.is_none() {
            row.started_at = Some(chrono::Utc::now());
        }
        let row = self.write_run(row).await?;
        Self::run_from_row(row)
    }

    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        error: Option<String>,
    ) -> StorageResult<RunRecord> {
        let mut row = self.fetch_run(&run_id.0).await?;
        let current: RunStatus = row.status.parse()?;
        if current.is_terminal() || !status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: row.status,
                expected: "a non-terminal run finishing into SUCCEEDED or FAILED".to_string(),
            });
        }
        row.status = status.as_str().to_string();
        row.error = error;
        row.finished_at = Some(chrono::Utc::now());
        let row = self.write_run(row).await?;
        Self::run_from_row(row)
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let row = self.fetch_run(&run_id.0).await?;
        Self::run_from_row(row)
    }

    async fn list_runs(&self, project_id: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let rows: Vec<RunRow> = if let Some(pid) = project_id {
            let mut res = self
                .db
                .query("SELECT * FROM runs WHERE project_id = $pid ORDER BY created_at DESC")
                .bind(("pid", pid.to_string()))
                .await?;
            res.take(0)?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM runs ORDER BY created_at DESC")
                .await?;
            res.take(0)?
        };

        rows.into_iter().map(Self::run_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// OutcomeStore
// ---------------------------------------------------------------------------

#[async_trait]
impl OutcomeStore for SurrealLedger {
    async fn insert_outcome(&self, outcome: NewOutcome) -> StorageResult<OutcomeRecord> {
        check_outcome(&outcome)?;

        if let Some(existing) = self.fetch_outcome(&outcome.run_id.0).await? {
            debug!(run_id = %outcome.run_id, "outcome already persisted");
            return Self::outcome_from_row(existing);
        }

        let row = OutcomeRow {
            id: None,
            outcome_id: uuid::Uuid::new_v4().to_string(),
            run_id: outcome.run_id.0.clone(),
            project_id: outcome.project_id,
            content: outcome.content,
            role: outcome.role.as_str().to_string(),
            kind: outcome.kind.as_str().to_string(),
            fragment: outcome.fragment.map(|f| FragmentRow {
                sandbox_url: f.sandbox_url,
                title: f.title,
                files: f.files,
            }),
            created_at: chrono::Utc::now(),
        };

        let created: Result<Option<OutcomeRow>, surrealdb::Error> =
            self.db.create("outcomes").content(row).await;
        match created {
            Ok(Some(row)) => return Self::outcome_from_row(row),
            Ok(None) => {}
            Err(e) => warn!(run_id = %outcome.run_id, error = %e, "outcome insert rejected"),
        }

        self.fetch_outcome(&outcome.run_id.0)
            .await?
            .map(Self::outcome_from_row)
            .transpose()?
            .ok_or_else(|| {
                StorageError::Backend(format!("outcome for run {} was not stored", outcome.run_id))
            })
    }

    async fn outcome_for_run(&self, run_id: &RunId) -> StorageResult<Option<OutcomeRecord>> {
        self.fetch_outcome(&run_id.0)
            .await?
            .map(Self::outcome_from_row)
            .transpose()
    }

    async fn list_for_project(&self, project_id: &str) -> StorageResult<Vec<OutcomeRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM outcomes WHERE project_id = $pid ORDER BY created_at ASC")
            .bind(("pid", project_id.to_string()))
            .await?;
        let rows: Vec<OutcomeRow> = res.take(0)?;
        rows.into_iter().map(Self::outcome_from_row).collect()
    }
}
