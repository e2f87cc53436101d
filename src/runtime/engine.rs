//! Pipeline construction and the run loop.
//!
//! [`PipelineBuilder`] assembles stages and edges into a validated
//! [`WorkflowEngine`]. The engine drives one stage at a time: snapshot,
//! execute, merge under the declared policies, checkpoint, then resolve the
//! next stage from a fixed edge or a conditional route. Routing predicates
//! see the post-merge state, so a stage's own output can decide where the
//! run goes next.
//!
//! # Failure semantics
//!
//! Stage errors obey the stage's [`FailurePolicy`]. A fatal failure, an
//! unroutable label, a blown step bound, an expired deadline, or a
//! checkpoint write error all abort the run; the returned [`RunFailure`]
//! carries the last successfully checkpointed record so callers can inspect
//! or resume from where the run actually got to.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointRecord, Checkpointer};
use super::config::RunOptions;
use crate::events::EngineEvent;
use crate::routing::RoutePredicate;
use crate::stage::{FailurePolicy, Stage, StageContext, StageError};
use crate::state::{ResearchState, Topic};
use crate::types::StageId;

/// A conditional route: a predicate plus its label-to-target map.
struct ConditionalRoute {
    predicate: RoutePredicate,
    targets: FxHashMap<String, StageId>,
}

/// Fluent builder for a [`WorkflowEngine`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use delver::runtime::PipelineBuilder;
/// use delver::routing::{ROUTE_PROCEED, ROUTE_REVISE, validation_router};
/// use delver::types::StageId;
/// # fn stages() -> (Arc<dyn delver::stage::Stage>, Arc<dyn delver::stage::Stage>) { unimplemented!() }
///
/// let (analysis, synthesis) = stages();
/// let engine = PipelineBuilder::new()
///     .add_stage_arc("analysis", analysis)
///     .add_stage_arc("synthesis", synthesis)
///     .add_edge(StageId::Start, "analysis")
///     .add_conditional_edge(
///         "analysis",
///         validation_router(),
///         [(ROUTE_REVISE, "analysis".into()), (ROUTE_PROCEED, "synthesis".into())],
///     )
///     .add_edge("synthesis", StageId::End)
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    stages: FxHashMap<StageId, Arc<dyn Stage>>,
    policies: FxHashMap<StageId, FailurePolicy>,
    edges: FxHashMap<StageId, StageId>,
    conditional: FxHashMap<StageId, ConditionalRoute>,
    options: RunOptions,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: FxHashMap::default(),
            policies: FxHashMap::default(),
            edges: FxHashMap::default(),
            conditional: FxHashMap::default(),
            options: RunOptions::default(),
            checkpointer: None,
        }
    }

    /// Register a stage under `id` with the default (fatal) failure policy.
    #[must_use]
    pub fn add_stage(self, id: impl Into<StageId>, stage: impl Stage + 'static) -> Self {
        self.add_stage_arc(id, Arc::new(stage))
    }

    /// Register an already-shared stage.
    #[must_use]
    pub fn add_stage_arc(mut self, id: impl Into<StageId>, stage: Arc<dyn Stage>) -> Self {
        let id = id.into();
        if matches!(id, StageId::Start | StageId::End) {
            warn!(stage = %id, "ignoring attempt to register a virtual endpoint");
            return self;
        }
        if self.stages.insert(id.clone(), stage).is_some() {
            warn!(stage = %id, "stage re-registered; previous registration replaced");
        }
        self
    }

    /// Register a stage with an explicit failure policy.
    #[must_use]
    pub fn add_stage_with_policy(
        mut self,
        id: impl Into<StageId>,
        stage: impl Stage + 'static,
        policy: FailurePolicy,
    ) -> Self {
        let id = id.into();
        self = self.add_stage_arc(id.clone(), Arc::new(stage));
        if self.stages.contains_key(&id) {
            self.policies.insert(id, policy);
        }
        self
    }

    /// Add a fixed edge. `Start` must have exactly one outgoing edge, the
    /// pipeline entry.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<StageId>, to: impl Into<StageId>) -> Self {
        self.edges.insert(from.into(), to.into());
        self
    }

    /// Add a conditional route out of `from`. The predicate runs against the
    /// post-merge state; its label is looked up in `targets`, and an unknown
    /// label fails the run.
    #[must_use]
    pub fn add_conditional_edge<L, I>(
        mut self,
        from: impl Into<StageId>,
        predicate: RoutePredicate,
        targets: I,
    ) -> Self
    where
        L: Into<String>,
        I: IntoIterator<Item = (L, StageId)>,
    {
        let targets = targets
            .into_iter()
            .map(|(label, target)| (label.into(), target))
            .collect();
        self.conditional
            .insert(from.into(), ConditionalRoute { predicate, targets });
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Validate the topology and produce an engine.
    pub fn build(self) -> Result<WorkflowEngine, BuildError> {
        if self.stages.is_empty() {
            return Err(BuildError::Empty);
        }
        let entry = self
            .edges
            .get(&StageId::Start)
            .cloned()
            .ok_or(BuildError::MissingEntryEdge)?;
        if !self.stages.contains_key(&entry) {
            return Err(BuildError::UnknownTarget {
                from: StageId::Start.to_string(),
                to: entry.to_string(),
            });
        }

        for (from, to) in &self.edges {
            if *from != StageId::Start && !self.stages.contains_key(from) {
                return Err(BuildError::UnknownTarget {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            if *to != StageId::End && !self.stages.contains_key(to) {
                return Err(BuildError::UnknownTarget {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        for (from, route) in &self.conditional {
            if self.edges.contains_key(from) {
                return Err(BuildError::AmbiguousRoute {
                    stage: from.to_string(),
                });
            }
            for target in route.targets.values() {
                if *target != StageId::End && !self.stages.contains_key(target) {
                    return Err(BuildError::UnknownTarget {
                        from: from.to_string(),
                        to: target.to_string(),
                    });
                }
            }
        }
        for id in self.stages.keys() {
            if !self.edges.contains_key(id) && !self.conditional.contains_key(id) {
                return Err(BuildError::MissingEdge {
                    stage: id.to_string(),
                });
            }
        }

        // The engine keeps one receiver alive so stage emits never fail.
        let (events_tx, events_rx) = flume::unbounded();
        Ok(WorkflowEngine {
            stages: self.stages,
            policies: self.policies,
            edges: self.edges,
            conditional: self.conditional,
            options: self.options,
            checkpointer: self.checkpointer,
            entry,
            events_tx,
            _events_rx: events_rx,
        })
    }
}

/// Topology errors caught at build time.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("pipeline has no stages")]
    #[diagnostic(code(delver::build::empty))]
    Empty,

    #[error("no entry edge from Start")]
    #[diagnostic(
        code(delver::build::missing_entry),
        help("Add an edge from StageId::Start to the first stage.")
    )]
    MissingEntryEdge,

    #[error("edge {from} -> {to} references an unregistered stage")]
    #[diagnostic(code(delver::build::unknown_target))]
    UnknownTarget { from: String, to: String },

    #[error("stage {stage} has both a fixed edge and a conditional route")]
    #[diagnostic(
        code(delver::build::ambiguous_route),
        help("Give a stage either one fixed edge or one conditional route, not both.")
    )]
    AmbiguousRoute { stage: String },

    #[error("stage {stage} has no outgoing edge")]
    #[diagnostic(
        code(delver::build::missing_edge),
        help("Every stage needs a fixed edge or a conditional route, possibly to StageId::End.")
    )]
    MissingEdge { stage: String },
}

/// Successful run result.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub run_id: String,
    /// Steps executed in this call. For a resumed run this excludes steps
    /// completed before the resume.
    pub steps: u64,
    pub state: ResearchState,
}

/// Fatal engine errors.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("stage {stage} failed")]
    #[diagnostic(code(delver::engine::stage_failed))]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("stage {stage} produced unroutable label {label:?}")]
    #[diagnostic(
        code(delver::engine::unroutable),
        help("Every label a predicate can return must appear in the conditional edge's targets.")
    )]
    UnroutableLabel { stage: String, label: String },

    #[error("run exceeded {limit} steps without reaching End")]
    #[diagnostic(
        code(delver::engine::did_not_converge),
        help("Check routing thresholds for a revision loop, or raise max_steps.")
    )]
    DidNotConverge { limit: u64, visited: Vec<String> },

    #[error("run deadline expired during stage {stage}")]
    #[diagnostic(code(delver::engine::deadline))]
    DeadlineExceeded { stage: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("no checkpoint found for run {run_id}")]
    #[diagnostic(
        code(delver::engine::unknown_run),
        help("resume_run requires a run that checkpointed at least one step.")
    )]
    UnknownRun { run_id: String },

    #[error("no checkpointer configured")]
    #[diagnostic(
        code(delver::engine::no_checkpointer),
        help("Attach a checkpointer with PipelineBuilder::with_checkpointer to resume runs.")
    )]
    NoCheckpointer,

    #[error("route leads to unregistered stage {stage}")]
    #[diagnostic(code(delver::engine::missing_stage))]
    MissingStage { stage: String },
}

/// A failed run, paired with the last record the run managed to checkpoint.
#[derive(Debug, Error, Diagnostic)]
#[error("{error}")]
#[diagnostic(code(delver::engine::run_failed))]
pub struct RunFailure {
    pub error: EngineError,
    pub last_checkpoint: Option<CheckpointRecord>,
}

/// Validated, runnable pipeline.
pub struct WorkflowEngine {
    stages: FxHashMap<StageId, Arc<dyn Stage>>,
    policies: FxHashMap<StageId, FailurePolicy>,
    edges: FxHashMap<StageId, StageId>,
    conditional: FxHashMap<StageId, ConditionalRoute>,
    options: RunOptions,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    entry: StageId,
    events_tx: flume::Sender<EngineEvent>,
    _events_rx: flume::Receiver<EngineEvent>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Subscribe to progress events. Events queue unread while no subscriber
    /// drains them; the queue is bounded by the run's step count.
    pub fn events(&self) -> flume::Receiver<EngineEvent> {
        self._events_rx.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Start a fresh run with a generated id.
    pub async fn start_run(&self, topic: Topic) -> Result<RunOutcome, RunFailure> {
        let run_id = Uuid::new_v4().to_string();
        self.start_run_with_id(run_id, topic).await
    }

    /// Start a fresh run under a caller-chosen id, e.g. to resume it later.
    #[instrument(skip_all, fields(topic = %topic.title()))]
    pub async fn start_run_with_id(
        &self,
        run_id: impl Into<String>,
        topic: Topic,
    ) -> Result<RunOutcome, RunFailure> {
        let run_id = run_id.into();
        let state = ResearchState::new(topic);
        self.emit(EngineEvent::RunStarted {
            run_id: run_id.clone(),
            topic: state.topic.title().to_string(),
        });
        self.drive(run_id, state, self.entry.clone(), 0).await
    }

    /// Resume a run from its latest checkpoint. Execution re-enters at the
    /// stage the checkpoint resolved as next; the stage that produced the
    /// checkpoint is never re-run.
    #[instrument(skip(self))]
    pub async fn resume_run(&self, run_id: &str) -> Result<RunOutcome, RunFailure> {
        let Some(checkpointer) = &self.checkpointer else {
            return Err(RunFailure {
                error: EngineError::NoCheckpointer,
                last_checkpoint: None,
            });
        };
        let latest = match checkpointer.load_latest(run_id).await {
            Ok(latest) => latest,
            Err(error) => {
                return Err(RunFailure {
                    error: error.into(),
                    last_checkpoint: None,
                });
            }
        };
        let Some(record) = latest else {
            return Err(RunFailure {
                error: EngineError::UnknownRun {
                    run_id: run_id.to_string(),
                },
                last_checkpoint: None,
            });
        };
        info!(step = record.step, next = %record.next_stage, "resuming from checkpoint");
        self.drive(
            run_id.to_string(),
            record.state.clone(),
            record.next_stage.clone(),
            record.step,
        )
        .await
    }

    /// Sequential run loop. There is exactly one writer to the state.
    async fn drive(
        &self,
        run_id: String,
        mut state: ResearchState,
        mut current: StageId,
        start_step: u64,
    ) -> Result<RunOutcome, RunFailure> {
        let started = Instant::now();
        let mut step = start_step;
        let mut visited: Vec<String> = Vec::new();

        loop {
            if current == StageId::End {
                self.emit(EngineEvent::RunFinished {
                    run_id: run_id.clone(),
                    steps: step,
                    phase: state.phase.clone(),
                });
                info!(run = %run_id, steps = step, phase = %state.phase, "run complete");
                return Ok(RunOutcome {
                    run_id,
                    steps: step - start_step,
                    state,
                });
            }

            if step >= self.options.max_steps {
                let error = EngineError::DidNotConverge {
                    limit: self.options.max_steps,
                    visited,
                };
                return Err(self.failure(&run_id, error).await);
            }

            let Some(stage) = self.stages.get(&current).cloned() else {
                let error = EngineError::MissingStage {
                    stage: current.to_string(),
                };
                return Err(self.failure(&run_id, error).await);
            };

            step += 1;
            visited.push(current.to_string());
            debug!(run = %run_id, step, stage = %current, "executing stage");

            let ctx = StageContext {
                stage_id: current.to_string(),
                step,
                events: self.events_tx.clone(),
            };
            let view = state.snapshot();
            let executed = match self.options.deadline {
                Some(total) => {
                    let Some(remaining) = total.checked_sub(started.elapsed()) else {
                        let error = EngineError::DeadlineExceeded {
                            stage: current.to_string(),
                        };
                        return Err(self.failure(&run_id, error).await);
                    };
                    // Dropping the stage future on expiry aborts its spawned
                    // sub-tasks, fetch fan-out included.
                    match tokio::time::timeout(remaining, stage.execute(view, ctx)).await {
                        Ok(result) => result,
                        Err(_) => {
                            let error = EngineError::DeadlineExceeded {
                                stage: current.to_string(),
                            };
                            return Err(self.failure(&run_id, error).await);
                        }
                    }
                }
                None => stage.execute(view, ctx).await,
            };

            match executed {
                Ok(update) => {
                    let touched = state.apply(update);
                    debug!(
                        run = %run_id,
                        step,
                        stage = %current,
                        touched = ?touched.iter().map(|f| f.name()).collect::<Vec<_>>(),
                        "merged stage update"
                    );
                }
                Err(stage_error) => match self.policy_for(&current) {
                    FailurePolicy::Fatal => {
                        let error = EngineError::Stage {
                            stage: current.to_string(),
                            source: stage_error,
                        };
                        return Err(self.failure(&run_id, error).await);
                    }
                    FailurePolicy::Skip => {
                        warn!(
                            run = %run_id,
                            step,
                            stage = %current,
                            error = %stage_error,
                            "stage failed; policy is skip, state unchanged"
                        );
                        self.emit(EngineEvent::StageSkipped {
                            run_id: run_id.clone(),
                            step,
                            stage: current.to_string(),
                            reason: stage_error.to_string(),
                        });
                    }
                },
            }

            // Routing sees the post-merge state.
            let next = match self.resolve_next(&current, &state) {
                Ok(next) => next,
                Err(error) => return Err(self.failure(&run_id, error).await),
            };

            if let Some(checkpointer) = &self.checkpointer {
                let record = CheckpointRecord {
                    run_id: run_id.clone(),
                    step,
                    phase: state.phase.clone(),
                    next_stage: next.clone(),
                    state: state.clone(),
                    created_at: Utc::now(),
                };
                if let Err(error) = checkpointer.save(record).await {
                    return Err(self.failure(&run_id, error.into()).await);
                }
                self.emit(EngineEvent::CheckpointSaved {
                    run_id: run_id.clone(),
                    step,
                });
            }

            self.emit(EngineEvent::StageCompleted {
                run_id: run_id.clone(),
                step,
                stage: current.to_string(),
                phase: state.phase.clone(),
            });
            current = next;
        }
    }

    fn policy_for(&self, stage: &StageId) -> FailurePolicy {
        self.policies.get(stage).copied().unwrap_or_default()
    }

    fn resolve_next(&self, current: &StageId, state: &ResearchState) -> Result<StageId, EngineError> {
        if let Some(route) = self.conditional.get(current) {
            let view = state.snapshot();
            let label = (route.predicate)(&view);
            return route.targets.get(&label).cloned().ok_or_else(|| {
                EngineError::UnroutableLabel {
                    stage: current.to_string(),
                    label,
                }
            });
        }
        if let Some(next) = self.edges.get(current) {
            return Ok(next.clone());
        }
        // Unreachable after build validation; kept as a runtime guard.
        Err(EngineError::MissingStage {
            stage: current.to_string(),
        })
    }

    /// Pair a fatal error with the last record actually checkpointed.
    async fn failure(&self, run_id: &str, error: EngineError) -> RunFailure {
        let last_checkpoint = match &self.checkpointer {
            Some(checkpointer) => checkpointer.load_latest(run_id).await.ok().flatten(),
            None => None,
        };
        warn!(run = %run_id, error = %error, "run failed");
        RunFailure {
            error,
            last_checkpoint,
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }
}
