//! Delver: a staged research workflow engine.
//!
//! A pipeline is a directed graph of [`stage::Stage`] implementations joined
//! by fixed edges and label-routed conditional edges. The
//! [`runtime::WorkflowEngine`] executes one stage per step, merges the
//! stage's sparse update into the shared [`state::ResearchState`] under
//! declared per-field policies, checkpoints the result, and follows the
//! routing to the next stage until it reaches `End` or a bound trips.
//!
//! The [`retrieval`] module supplies the concurrent multi-source fetch layer
//! the stock retrieval stage is built on: bounded fan-out, per-source
//! timeouts, partial-failure tolerance, first-seen-wins deduplication, and
//! normalized-query memoization.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use delver::runtime::{InMemoryCheckpointer, RunOptions};
//! use delver::stages::{TemplateProvider, research_pipeline};
//! use delver::state::{Complexity, Topic};
//!
//! # async fn run(sources: Vec<Arc<dyn delver::retrieval::RetrievalSource>>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = research_pipeline(
//!     Arc::new(TemplateProvider::new()),
//!     sources,
//!     RunOptions::default(),
//! )
//! .with_checkpointer(Arc::new(InMemoryCheckpointer::new()))
//! .build()?;
//!
//! let topic = Topic::new("Renewable Energy Storage", "energy", Complexity::Intermediate)?;
//! let outcome = engine.start_run(topic).await.map_err(|failure| failure.error)?;
//! println!("finished in {} steps, phase {}", outcome.steps, outcome.state.phase);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod message;
pub mod retrieval;
pub mod routing;
pub mod runtime;
pub mod stage;
pub mod stages;
pub mod state;
pub mod trace;
pub mod types;

pub use runtime::{PipelineBuilder, RunOptions, WorkflowEngine};
pub use stage::{FailurePolicy, Stage, StageContext, StageError};
pub use state::{ResearchState, StageUpdate, StateView, Topic};
pub use types::StageId;
