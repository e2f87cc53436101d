//! Serde-facing checkpoint shapes.
//!
//! This module intentionally does NOT perform I/O. Backends serialize through
//! [`PersistedCheckpoint`] so the wire format stays stable even if the
//! runtime types grow fields, and so format concerns never leak into the
//! database code.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::checkpoint::CheckpointRecord;
use crate::state::ResearchState;
use crate::types::StageId;

/// Wire shape of one checkpoint record. `next_stage` uses the string
/// encoding from [`StageId::encode`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub run_id: String,
    pub step: u64,
    pub phase: String,
    pub next_stage: String,
    pub state: ResearchState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("checkpoint JSON error: {0}")]
    #[diagnostic(code(delver::persistence::json))]
    Json(#[from] serde_json::Error),
}

impl From<&CheckpointRecord> for PersistedCheckpoint {
    fn from(record: &CheckpointRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            step: record.step,
            phase: record.phase.clone(),
            next_stage: record.next_stage.encode(),
            state: record.state.clone(),
            created_at: record.created_at,
        }
    }
}

impl From<PersistedCheckpoint> for CheckpointRecord {
    fn from(persisted: PersistedCheckpoint) -> Self {
        Self {
            run_id: persisted.run_id,
            step: persisted.step,
            phase: persisted.phase,
            next_stage: StageId::decode(&persisted.next_stage),
            state: persisted.state,
            created_at: persisted.created_at,
        }
    }
}

impl PersistedCheckpoint {
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Complexity, Topic, phases};

    #[test]
    fn json_roundtrip_preserves_record() {
        let topic =
            Topic::new("Grid Scale Storage", "energy", Complexity::Advanced).unwrap();
        let record = CheckpointRecord {
            run_id: "run-1".into(),
            step: 3,
            phase: phases::ANALYZING.to_string(),
            next_stage: StageId::Named("validation".into()),
            state: ResearchState::new(topic),
            created_at: Utc::now(),
        };

        let persisted = PersistedCheckpoint::from(&record);
        let json = persisted.to_json().unwrap();
        let back = CheckpointRecord::from(PersistedCheckpoint::from_json(&json).unwrap());

        assert_eq!(back.run_id, record.run_id);
        assert_eq!(back.step, record.step);
        assert_eq!(back.next_stage, record.next_stage);
        assert_eq!(back.state, record.state);
    }
}
