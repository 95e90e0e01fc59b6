//! Row types for the vibe SurrealDB tables
//!
//! Tables:
//! - runs: one row per run, lifecycle PENDING → RUNNING → terminal
//! - steps: memoized step results, unique on (run_id, step_id)
//! - outcomes: the persisted message of a run, unique on run_id
//!
//! Rows are converted to `storage_traits` types at the ledger boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => serde::Serialize::serialize(&Some(SurrealDatetime::from(*d)), serializer),
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Run row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Unique run ID (UUID string)
    pub run_id: String,
    pub project_id: String,
    pub input: String,
    /// "PENDING" | "RUNNING" | "SUCCEEDED" | "FAILED"
    pub status: String,
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRow {
    /// A fresh PENDING run.
    pub fn new(run_id: String, project_id: String, input: String) -> Self {
        RunRow {
            id: None,
            run_id,
            project_id,
            input,
            status: "PENDING".to_string(),
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Step row
///
/// The output is stored as a JSON string so its digest survives the round
/// trip through the database's own value model unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    pub step_id: String,
    /// "completed" | "failed"
    pub status: String,
    #[serde(default)]
    pub output_json: Option<String>,
    #[serde(default)]
    pub output_digest: Option<String>,
    pub failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRow {
    /// A completed step row.
    pub fn completed(run_id: String, step_id: String, output_json: String, digest: String) -> Self {
        let now = Utc::now();
        StepRow {
            id: None,
            run_id,
            step_id,
            status: "completed".to_string(),
            output_json: Some(output_json),
            output_digest: Some(digest),
            failures: 0,
            last_error: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    /// A step row recording its first failure.
    pub fn failed(run_id: String, step_id: String, error: String) -> Self {
        StepRow {
            id: None,
            run_id,
            step_id,
            status: "failed".to_string(),
            output_json: None,
            output_digest: None,
            failures: 1,
            last_error: Some(error),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Fragment embedded in an outcome row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRow {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

/// Outcome row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub outcome_id: String,
    pub run_id: String,
    pub project_id: String,
    pub content: String,
    /// "USER" | "ASSISTANT"
    pub role: String,
    /// "RESULT" | "ERROR"
    pub kind: String,
    #[serde(default)]
    pub fragment: Option<FragmentRow>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}
