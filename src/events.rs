//! Coarse progress events emitted while a run executes.
//!
//! The engine keeps one receiver alive internally, so sends never fail while
//! the engine exists; call [`crate::runtime::WorkflowEngine::events`] to
//! subscribe.

#[derive(Clone, Debug)]
pub enum EngineEvent {
    RunStarted {
        run_id: String,
        topic: String,
    },
    StageCompleted {
        run_id: String,
        step: u64,
        stage: String,
        phase: String,
    },
    StageSkipped {
        run_id: String,
        step: u64,
        stage: String,
        reason: String,
    },
    CheckpointSaved {
        run_id: String,
        step: u64,
    },
    /// Free-form note emitted by a stage via [`crate::stage::StageContext::emit`].
    StageNote {
        stage: String,
        step: u64,
        message: String,
    },
    RunFinished {
        run_id: String,
        steps: u64,
        phase: String,
    },
}
