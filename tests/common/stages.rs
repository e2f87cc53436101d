use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use delver::message::Message;
use delver::stage::{Stage, StageContext, StageError};
use delver::state::{StageUpdate, StateView};
use serde_json::Value;

/// Appends "<name> ran" to the message history and counts invocations.
/// Optionally sets the phase.
#[derive(Clone)]
pub struct NoteStage {
    pub name: &'static str,
    pub phase: Option<&'static str>,
    pub calls: Arc<AtomicUsize>,
}

impl NoteStage {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            phase: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_phase(mut self, phase: &'static str) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Share an external counter, e.g. across two engines over one run id.
    pub fn with_calls(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for NoteStage {
    async fn execute(
        &self,
        _view: StateView,
        _ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut update =
            StageUpdate::new().with_messages(vec![Message::assistant(format!("{} ran", self.name))]);
        if let Some(phase) = self.phase {
            update = update.with_phase(phase);
        }
        Ok(update)
    }
}

/// Always fails, counting invocations.
#[derive(Clone)]
pub struct FailingStage {
    pub calls: Arc<AtomicUsize>,
}

impl FailingStage {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for FailingStage {
    async fn execute(
        &self,
        _view: StateView,
        _ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StageError::Provider {
            provider: "scripted",
            message: "always fails".into(),
        })
    }
}

/// Writes one metadata entry, for driving routing predicates.
#[derive(Clone)]
pub struct FlagStage {
    pub key: &'static str,
    pub value: Value,
}

impl FlagStage {
    pub fn new(key: &'static str, value: Value) -> Self {
        Self { key, value }
    }
}

#[async_trait]
impl Stage for FlagStage {
    async fn execute(
        &self,
        _view: StateView,
        _ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        Ok(StageUpdate::new().with_metadata_entry(self.key, self.value.clone()))
    }
}

/// Sleeps before succeeding, for deadline tests.
#[derive(Clone, Copy)]
pub struct SleepStage {
    pub duration: Duration,
}

impl SleepStage {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Stage for SleepStage {
    async fn execute(
        &self,
        _view: StateView,
        _ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        tokio::time::sleep(self.duration).await;
        Ok(StageUpdate::new())
    }
}
