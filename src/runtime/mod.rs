//! Run execution: engine loop, options, and checkpoint persistence.

pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpoint_sqlite;
pub mod config;
pub mod engine;
pub mod persistence;

pub use checkpoint::{CheckpointError, CheckpointRecord, Checkpointer, InMemoryCheckpointer};
#[cfg(feature = "sqlite")]
pub use checkpoint_sqlite::SqliteCheckpointer;
pub use config::{RunOptions, resolve_sqlite_db_name};
pub use engine::{BuildError, EngineError, PipelineBuilder, RunFailure, RunOutcome, WorkflowEngine};
