//! The executable unit of a pipeline.
//!
//! A [`Stage`] receives a read-only [`StateView`] and a [`StageContext`],
//! does its work, and returns a sparse [`StageUpdate`] for the engine to
//! merge. Stages hold their own collaborators (providers, fetchers) and are
//! expected to be deterministic given the same view.
//!
//! # Error handling
//!
//! Returning `Err(StageError)` is reserved for conditions the pipeline
//! cannot recover from by routing, such as a missing required input or a
//! failed provider. Recoverable conditions (zero retrieval results, low
//! confidence, validation defects) are encoded in the returned update so the
//! routing layer can react to them.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::events::EngineEvent;
use crate::state::{StageUpdate, StateView};

#[async_trait]
pub trait Stage: Send + Sync {
    /// Execute this stage against a snapshot of the run state.
    async fn execute(&self, view: StateView, ctx: StageContext) -> Result<StageUpdate, StageError>;
}

/// What the engine does when a stage returns `Err`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the run. The last checkpoint is retained for inspection.
    #[default]
    Fatal,
    /// Log the failure, checkpoint the unmodified state, and move on along
    /// the stage's outgoing edge.
    Skip,
}

/// Execution context handed to a stage for one step.
#[derive(Clone, Debug)]
pub struct StageContext {
    /// Identifier the stage was registered under.
    pub stage_id: String,
    /// One-based step number within the run.
    pub step: u64,
    /// Channel for progress notes surfaced to engine subscribers.
    pub events: flume::Sender<EngineEvent>,
}

impl StageContext {
    /// Emit a progress note tagged with this stage and step.
    pub fn emit(&self, message: impl Into<String>) -> Result<(), StageContextError> {
        self.events
            .send(EngineEvent::StageNote {
                stage: self.stage_id.clone(),
                step: self.step,
                message: message.into(),
            })
            .map_err(|_| StageContextError::EventChannelClosed)
    }
}

/// Errors from [`StageContext`] methods.
#[derive(Debug, Error, Diagnostic)]
pub enum StageContextError {
    #[error("failed to emit event: channel closed")]
    #[diagnostic(
        code(delver::stage::event_channel_closed),
        help("All event receivers were dropped. Keep the engine's receiver alive.")
    )]
    EventChannelClosed,
}

/// Fatal stage failures.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    /// A required piece of state was absent.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(delver::stage::missing_input),
        help("Check that the upstream stage produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// A collaborator (completion provider, backend) failed.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(delver::stage::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error(transparent)]
    #[diagnostic(code(delver::stage::serde_json))]
    Serde(#[from] serde_json::Error),

    #[error("event channel error: {0}")]
    #[diagnostic(code(delver::stage::event_channel))]
    Event(#[from] StageContextError),
}
