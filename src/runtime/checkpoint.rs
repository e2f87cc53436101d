//! Checkpoint contract and the in-memory backend.
//!
//! A run checkpoints after every merged step. Each record carries the
//! post-merge state and the already-resolved next stage, so a resumed run
//! re-enters at step k+1 and never re-executes the stage that produced the
//! record. That guarantee is what keeps append-policy fields from being
//! double-applied across a crash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::state::ResearchState;
use crate::types::StageId;

/// One persisted step of a run.
#[derive(Clone, Debug)]
pub struct CheckpointRecord {
    pub run_id: String,
    /// One-based step number; strictly increasing within a run.
    pub step: u64,
    /// Phase label at the moment the record was written.
    pub phase: String,
    /// Stage a resumed run enters next. `End` means the run finished.
    pub next_stage: StageId,
    pub state: ResearchState,
    pub created_at: DateTime<Utc>,
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint backend error: {message}")]
    #[diagnostic(
        code(delver::checkpoint::backend),
        help("Check the database URL and that migrations have been applied.")
    )]
    Backend { message: String },

    #[error("checkpoint serialization error: {message}")]
    #[diagnostic(code(delver::checkpoint::serde))]
    Serde { message: String },

    #[error("non-monotonic checkpoint: step {step} after step {last}")]
    #[diagnostic(
        code(delver::checkpoint::non_monotonic),
        help("A run must checkpoint strictly increasing steps. Two writers on one run id?")
    )]
    NonMonotonic { step: u64, last: u64 },
}

/// Durable (or test-scoped) storage for checkpoint records.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Append one record to the run's history.
    async fn save(&self, record: CheckpointRecord) -> Result<()>;

    /// Latest record for a run, if any.
    async fn load_latest(&self, run_id: &str) -> Result<Option<CheckpointRecord>>;

    /// Full history for a run, in ascending step order.
    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>>;

    /// Known run ids.
    async fn list_runs(&self) -> Result<Vec<String>>;
}

/// Append-only in-memory checkpointer for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    records: Mutex<FxHashMap<String, Vec<CheckpointRecord>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, record: CheckpointRecord) -> Result<()> {
        let mut records = self.records.lock();
        let history = records.entry(record.run_id.clone()).or_default();
        if let Some(last) = history.last()
            && record.step <= last.step
        {
            return Err(CheckpointError::NonMonotonic {
                step: record.step,
                last: last.step,
            });
        }
        history.push(record);
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<CheckpointRecord>> {
        Ok(self
            .records
            .lock()
            .get(run_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>> {
        Ok(self.records.lock().get(run_id).cloned().unwrap_or_default())
    }

    async fn list_runs(&self) -> Result<Vec<String>> {
        let mut runs: Vec<String> = self.records.lock().keys().cloned().collect();
        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Complexity, Topic, phases};

    fn record(run_id: &str, step: u64) -> CheckpointRecord {
        let topic =
            Topic::new("Grid Scale Storage", "energy", Complexity::Intermediate).unwrap();
        CheckpointRecord {
            run_id: run_id.to_string(),
            step,
            phase: phases::PLANNING.to_string(),
            next_stage: StageId::Named("retrieval".into()),
            state: ResearchState::new(topic),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn latest_returns_highest_step() {
        let cp = InMemoryCheckpointer::new();
        cp.save(record("run-1", 1)).await.unwrap();
        cp.save(record("run-1", 2)).await.unwrap();
        let latest = cp.load_latest("run-1").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);
    }

    #[tokio::test]
    async fn rejects_non_monotonic_steps() {
        let cp = InMemoryCheckpointer::new();
        cp.save(record("run-1", 2)).await.unwrap();
        let err = cp.save(record("run-1", 2)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NonMonotonic { .. }));
    }

    #[tokio::test]
    async fn histories_are_per_run() {
        let cp = InMemoryCheckpointer::new();
        cp.save(record("run-1", 1)).await.unwrap();
        cp.save(record("run-2", 1)).await.unwrap();
        assert_eq!(cp.history("run-1").await.unwrap().len(), 1);
        assert_eq!(cp.list_runs().await.unwrap(), vec!["run-1", "run-2"]);
        assert!(cp.load_latest("run-3").await.unwrap().is_none());
    }
}
