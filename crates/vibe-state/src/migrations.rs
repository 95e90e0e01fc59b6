//! SurrealDB schema migrations and initialization
//!
//! Sets up the tables with the unique indexes that the storage traits rely
//! on for insert-if-absent semantics.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all vibe tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing vibe SurrealDB schema");

    init_runs_table(db).await?;
    init_steps_table(db).await?;
    init_outcomes_table(db).await?;

    info!("vibe schema initialization complete");
    Ok(())
}

/// Initialize `runs` table
///
/// Schema:
/// ```text
/// TABLE runs {
///   run_id:       STRING (unique)
///   project_id:   STRING (indexed)
///   input:        STRING
///   status:       STRING (PENDING | RUNNING | SUCCEEDED | FAILED)
///   attempts:     INT
///   error:        STRING?
///   created_at:   DATETIME (indexed)
///   started_at:   DATETIME?
///   finished_at:  DATETIME?
/// }
/// ```
///
/// Status transitions and terminal immutability are enforced by the ledger.
async fn init_runs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_run_project ON TABLE runs COLUMNS project_id;
        DEFINE INDEX IF NOT EXISTS idx_run_created_at ON TABLE runs COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ runs table initialized");
    Ok(())
}

/// Initialize `steps` table
///
/// Schema:
/// ```text
/// TABLE steps {
///   run_id:         STRING
///   step_id:        STRING
///   status:         STRING (completed | failed)
///   output_json:    STRING?
///   output_digest:  STRING?
///   failures:       INT
///   last_error:     STRING?
///   created_at:     DATETIME
///   completed_at:   DATETIME?
/// }
/// ```
///
/// Constraints:
/// - `(run_id, step_id)` is unique, so two writers racing to memoize the
///   same step cannot both insert a row
async fn init_steps_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing steps table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS steps SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_step_key ON TABLE steps COLUMNS run_id, step_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_step_run ON TABLE steps COLUMNS run_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ steps table initialized");
    Ok(())
}

/// Initialize `outcomes` table
///
/// Constraints:
/// - `run_id` is unique: a run persists at most one outcome
async fn init_outcomes_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing outcomes table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS outcomes SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_outcome_run ON TABLE outcomes COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_outcome_project ON TABLE outcomes COLUMNS project_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ outcomes table initialized");
    Ok(())
}
