//! Result sink: persist a run's outcome exactly once.
//!
//! The write happens inside the memoized `save-result` step, and the outcome
//! store itself is unique per run id, so a crash between the insert and the
//! step record only ever leads to a re-read of the same row.

use std::sync::Arc;

use vibe_state::{
    Fragment, MessageRole, NewOutcome, OutcomeKind, OutcomeRecord, OutcomeStore, RunRecord,
};

use crate::obs;
use crate::step::{StepContext, StepResult};

/// Content of every ERROR outcome.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

pub const SAVE_RESULT_STEP: &str = "save-result";

/// What the run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Success { content: String, fragment: Fragment },
    Failure,
}

impl Verdict {
    fn into_outcome(self, run: &RunRecord) -> NewOutcome {
        let (content, kind, fragment) = match self {
            Verdict::Success { content, fragment } => (content, OutcomeKind::Result, Some(fragment)),
            Verdict::Failure => (GENERIC_ERROR_MESSAGE.to_string(), OutcomeKind::Error, None),
        };
        NewOutcome {
            run_id: run.run_id.clone(),
            project_id: run.project_id.clone(),
            content,
            role: MessageRole::Assistant,
            kind,
            fragment,
        }
    }
}

/// Writes run outcomes.
#[derive(Clone)]
pub struct ResultSink {
    outcomes: Arc<dyn OutcomeStore>,
}

impl ResultSink {
    pub fn new(outcomes: Arc<dyn OutcomeStore>) -> Self {
        Self { outcomes }
    }

    pub async fn persist(
        &self,
        ctx: &StepContext,
        run: &RunRecord,
        verdict: Verdict,
    ) -> StepResult<OutcomeRecord> {
        let outcome = verdict.into_outcome(run);
        let store = self.outcomes.as_ref();
        let record: OutcomeRecord = ctx
            .run(SAVE_RESULT_STEP, || async move {
                store.insert_outcome(outcome).await
            })
            .await?;
        obs::emit_outcome_persisted(&run.run_id.0, record.kind.as_str());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use vibe_state::fakes::{MemoryOutcomeStore, MemoryStepLedger};
    use vibe_state::{NewRun, RunStore};

    use super::*;

    async fn run_record() -> RunRecord {
        vibe_state::fakes::MemoryRunStore::new()
            .create_run(NewRun {
                project_id: "p1".into(),
                input: "build a counter".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn failure_has_generic_message_and_no_fragment() {
        let run = run_record().await;
        let store = Arc::new(MemoryOutcomeStore::new());
        let ledger = Arc::new(MemoryStepLedger::new());
        let ctx = StepContext::new(run.run_id.clone(), ledger);

        let record = ResultSink::new(store)
            .persist(&ctx, &run, Verdict::Failure)
            .await
            .unwrap();
        assert_eq!(record.kind, OutcomeKind::Error);
        assert_eq!(record.role, MessageRole::Assistant);
        assert_eq!(record.content, GENERIC_ERROR_MESSAGE);
        assert!(record.fragment.is_none());
    }

    #[tokio::test]
    async fn second_persist_replays_first_outcome() {
        let run = run_record().await;
        let store = Arc::new(MemoryOutcomeStore::new());
        let ledger = Arc::new(MemoryStepLedger::new());
        let sink = ResultSink::new(store.clone());
        let success = Verdict::Success {
            content: "<task_summary>done</task_summary>".into(),
            fragment: Fragment {
                sandbox_url: "https://3000-sbx".into(),
                title: "Fragment".into(),
                files: BTreeMap::from([("app/page.tsx".to_string(), "x".to_string())]),
            },
        };

        let first = sink
            .persist(&StepContext::new(run.run_id.clone(), ledger.clone()), &run, success)
            .await
            .unwrap();
        let second = sink
            .persist(&StepContext::new(run.run_id.clone(), ledger), &run, Verdict::Failure)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_is_not_memoized() {
        let run = run_record().await;
        let store = Arc::new(MemoryOutcomeStore::new());
        store.fail_next_inserts(1);
        let ledger = Arc::new(MemoryStepLedger::new());
        let sink = ResultSink::new(store.clone());

        let first = sink
            .persist(&StepContext::new(run.run_id.clone(), ledger.clone()), &run, Verdict::Failure)
            .await;
        assert!(first.is_err());
        let second = sink
            .persist(&StepContext::new(run.run_id.clone(), ledger), &run, Verdict::Failure)
            .await
            .unwrap();
        assert_eq!(second.kind, OutcomeKind::Error);
        assert_eq!(store.len(), 1);
    }
}
