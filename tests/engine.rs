use std::sync::Arc;
use std::time::Duration;

use delver::events::EngineEvent;
use delver::routing::RoutePredicate;
use delver::runtime::{BuildError, EngineError, InMemoryCheckpointer, PipelineBuilder, RunOptions};
use delver::stage::FailurePolicy;
use delver::state::StateView;
use delver::types::StageId;

mod common;
use common::*;

#[tokio::test]
async fn linear_run_reaches_end() {
    let engine = PipelineBuilder::new()
        .add_stage("first", NoteStage::new("first"))
        .add_stage("second", NoteStage::new("second").with_phase("done"))
        .add_edge(StageId::Start, "first")
        .add_edge("first", "second")
        .add_edge("second", StageId::End)
        .build()
        .unwrap();

    let outcome = engine.start_run(topic()).await.unwrap();
    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.state.phase, "done");
    let contents: Vec<&str> = outcome
        .state
        .messages
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["first ran", "second ran"]);
}

#[tokio::test]
async fn conditional_edge_routes_on_post_merge_state() {
    let predicate: RoutePredicate = Arc::new(|view: &StateView| {
        if view.metadata.contains_key("go_left") {
            "left".to_string()
        } else {
            "right".to_string()
        }
    });

    let engine = PipelineBuilder::new()
        .add_stage("root", FlagStage::new("go_left", serde_json::json!(true)))
        .add_stage("left", NoteStage::new("left"))
        .add_stage("right", NoteStage::new("right"))
        .add_edge(StageId::Start, "root")
        .add_conditional_edge(
            "root",
            predicate,
            [
                ("left", StageId::from("left")),
                ("right", StageId::from("right")),
            ],
        )
        .add_edge("left", StageId::End)
        .add_edge("right", StageId::End)
        .build()
        .unwrap();

    let outcome = engine.start_run(topic()).await.unwrap();
    // The flag written by root is visible to the predicate in the same step.
    assert_eq!(outcome.state.messages.len(), 1);
    assert_eq!(outcome.state.messages[0].content, "left ran");
}

#[tokio::test]
async fn unroutable_label_fails_with_last_checkpoint() {
    let predicate: RoutePredicate = Arc::new(|_: &StateView| "nowhere".to_string());
    let checkpointer = Arc::new(InMemoryCheckpointer::new());

    let engine = PipelineBuilder::new()
        .add_stage("root", NoteStage::new("root"))
        .add_stage("leaf", NoteStage::new("leaf"))
        .add_edge(StageId::Start, "root")
        .add_conditional_edge("root", predicate, [("known", StageId::from("leaf"))])
        .add_edge("leaf", StageId::End)
        .with_checkpointer(checkpointer)
        .build()
        .unwrap();

    let failure = engine.start_run(topic()).await.unwrap_err();
    match &failure.error {
        EngineError::UnroutableLabel { stage, label } => {
            assert_eq!(stage, "root");
            assert_eq!(label, "nowhere");
        }
        other => panic!("expected UnroutableLabel, got {other:?}"),
    }
    // Routing failed before the step checkpointed, so nothing was saved.
    assert!(failure.last_checkpoint.is_none());
}

#[tokio::test]
async fn skip_policy_logs_and_continues() {
    let flaky = FailingStage::new();
    let flaky_calls = flaky.calls.clone();

    let engine = PipelineBuilder::new()
        .add_stage("first", NoteStage::new("first"))
        .add_stage_with_policy("flaky", flaky, FailurePolicy::Skip)
        .add_stage("last", NoteStage::new("last"))
        .add_edge(StageId::Start, "first")
        .add_edge("first", "flaky")
        .add_edge("flaky", "last")
        .add_edge("last", StageId::End)
        .build()
        .unwrap();

    let outcome = engine.start_run(topic()).await.unwrap();
    assert_eq!(flaky_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    // The skipped stage contributed nothing to the state.
    let contents: Vec<&str> = outcome
        .state
        .messages
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["first ran", "last ran"]);
}

#[tokio::test]
async fn fatal_policy_aborts_and_keeps_last_checkpoint() {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let engine = PipelineBuilder::new()
        .add_stage("first", NoteStage::new("first"))
        .add_stage("boom", FailingStage::new())
        .add_edge(StageId::Start, "first")
        .add_edge("first", "boom")
        .add_edge("boom", StageId::End)
        .with_checkpointer(checkpointer)
        .build()
        .unwrap();

    let failure = engine.start_run(topic()).await.unwrap_err();
    assert!(matches!(failure.error, EngineError::Stage { .. }));
    let record = failure.last_checkpoint.expect("step 1 checkpointed");
    assert_eq!(record.step, 1);
    assert_eq!(record.next_stage, StageId::from("boom"));
    assert_eq!(record.state.messages[0].content, "first ran");
}

#[tokio::test]
async fn ping_pong_hits_the_step_bound() {
    let engine = PipelineBuilder::new()
        .add_stage("ping", NoteStage::new("ping"))
        .add_stage("pong", NoteStage::new("pong"))
        .add_edge(StageId::Start, "ping")
        .add_edge("ping", "pong")
        .add_edge("pong", "ping")
        .with_options(RunOptions {
            max_steps: 6,
            ..RunOptions::default()
        })
        .build()
        .unwrap();

    let failure = engine.start_run(topic()).await.unwrap_err();
    match failure.error {
        EngineError::DidNotConverge { limit, visited } => {
            assert_eq!(limit, 6);
            assert_eq!(visited.len(), 6);
            assert_eq!(visited[0], "ping");
            assert_eq!(visited[5], "pong");
        }
        other => panic!("expected DidNotConverge, got {other:?}"),
    }
}

#[tokio::test]
async fn deadline_expiry_aborts_the_run() {
    let engine = PipelineBuilder::new()
        .add_stage("slow", SleepStage::new(Duration::from_millis(500)))
        .add_edge(StageId::Start, "slow")
        .add_edge("slow", StageId::End)
        .with_options(RunOptions {
            deadline: Some(Duration::from_millis(50)),
            ..RunOptions::default()
        })
        .build()
        .unwrap();

    let failure = engine.start_run(topic()).await.unwrap_err();
    assert!(matches!(
        failure.error,
        EngineError::DeadlineExceeded { .. }
    ));
}

#[tokio::test]
async fn run_emits_lifecycle_events() {
    let engine = PipelineBuilder::new()
        .add_stage("only", NoteStage::new("only"))
        .add_edge(StageId::Start, "only")
        .add_edge("only", StageId::End)
        .build()
        .unwrap();
    let events = engine.events();

    engine.start_run(topic()).await.unwrap();

    let mut saw_started = false;
    let mut saw_completed = false;
    let mut saw_finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::RunStarted { .. } => saw_started = true,
            EngineEvent::StageCompleted { stage, .. } => {
                assert_eq!(stage, "only");
                saw_completed = true;
            }
            EngineEvent::RunFinished { steps, .. } => {
                assert_eq!(steps, 1);
                saw_finished = true;
            }
            _ => {}
        }
    }
    assert!(saw_started && saw_completed && saw_finished);
}

#[test]
fn engine_debug_lists_registered_stages() {
    let engine = PipelineBuilder::new()
        .add_stage("only", NoteStage::new("only"))
        .add_edge(StageId::Start, "only")
        .add_edge("only", StageId::End)
        .build()
        .unwrap();
    let rendered = format!("{engine:?}");
    assert!(rendered.contains("WorkflowEngine"));
    assert!(rendered.contains("only"));
}

#[test]
fn build_rejects_missing_entry_edge() {
    let err = PipelineBuilder::new()
        .add_stage("only", NoteStage::new("only"))
        .add_edge("only", StageId::End)
        .build()
        .unwrap_err();
    assert!(matches!(err, BuildError::MissingEntryEdge));
}

#[test]
fn build_rejects_unknown_edge_target() {
    let err = PipelineBuilder::new()
        .add_stage("only", NoteStage::new("only"))
        .add_edge(StageId::Start, "only")
        .add_edge("only", "ghost")
        .build()
        .unwrap_err();
    assert!(matches!(err, BuildError::UnknownTarget { .. }));
}

#[test]
fn build_rejects_dangling_stage() {
    let err = PipelineBuilder::new()
        .add_stage("first", NoteStage::new("first"))
        .add_stage("stranded", NoteStage::new("stranded"))
        .add_edge(StageId::Start, "first")
        .add_edge("first", StageId::End)
        .build()
        .unwrap_err();
    match err {
        BuildError::MissingEdge { stage } => assert_eq!(stage, "stranded"),
        other => panic!("expected MissingEdge, got {other:?}"),
    }
}

#[test]
fn build_rejects_ambiguous_routing() {
    let predicate: RoutePredicate = Arc::new(|_: &StateView| "x".to_string());
    let err = PipelineBuilder::new()
        .add_stage("root", NoteStage::new("root"))
        .add_stage("leaf", NoteStage::new("leaf"))
        .add_edge(StageId::Start, "root")
        .add_edge("root", "leaf")
        .add_conditional_edge("root", predicate, [("x", StageId::from("leaf"))])
        .add_edge("leaf", StageId::End)
        .build()
        .unwrap_err();
    assert!(matches!(err, BuildError::AmbiguousRoute { .. }));
}
