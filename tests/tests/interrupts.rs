//! Human-in-the-loop pauses and resumption.

mod common;

use serde_json::json;
use std::sync::Arc;

use common::{counter_graph, counter_input, increment, logging, pipeline};
use stepgraph_foundation::InMemoryCheckpointStore;
use stepgraph_kernel::checkpoint::{CheckpointSource, InterruptKind, RunStatus};
use stepgraph_kernel::error::GraphError;
use stepgraph_kernel::workflow::{GraphConfig, PartialState, RunConfig, RunOutcome};
use stepgraph_testing::{ScriptedStep, assert_step_called};

fn steps() -> (ScriptedStep, ScriptedStep, ScriptedStep) {
    (logging("a"), logging("b"), logging("c"))
}

#[tokio::test]
async fn test_resume_after_pause_matches_uninterrupted_run() {
    let (a, b, c) = steps();
    let straight = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::default(),
    );
    let expected = straight
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();

    let (a, b, c) = steps();
    let paused = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::new().interrupt_before("b"),
    );
    let outcome = paused
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();

    let handle = outcome.interrupt().unwrap();
    assert_eq!(handle.kind, InterruptKind::Before);
    assert_eq!(handle.step, "b");
    assert_eq!(handle.next_step.as_deref(), Some("b"));
    assert_eq!(handle.state.get("log"), Some(&json!(["a"])));
    assert_step_called!(b, 0);

    let checkpoint = paused.get_state("s1").await.unwrap();
    assert_eq!(checkpoint.status, RunStatus::Interrupted);
    assert_eq!(checkpoint.interrupt, Some(InterruptKind::Before));
    assert_eq!(checkpoint.version, handle.version);

    let resumed = paused.resume("s1", None).await.unwrap();
    assert!(resumed.is_completed());
    assert_eq!(resumed.state(), expected.state());
    assert_step_called!(b, 1);
    assert_step_called!(c, 1);
}

#[tokio::test]
async fn test_pause_after_step_then_update_and_resume() {
    let (a, b, c) = steps();
    let app = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::new().interrupt_after("a"),
    );

    let outcome = app
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();
    let handle = outcome.interrupt().unwrap();
    assert_eq!(handle.kind, InterruptKind::After);
    assert_eq!(handle.step, "a");
    assert_eq!(handle.next_step.as_deref(), Some("b"));

    let updated = app
        .update_state("s1", PartialState::new().with("log", "approved"))
        .await
        .unwrap();
    assert_eq!(updated.source, CheckpointSource::Update);
    assert_eq!(updated.status, RunStatus::Interrupted);

    let resumed = app.resume("s1", None).await.unwrap();
    assert_eq!(
        resumed.state().get("log"),
        Some(&json!(["a", "approved", "b", "c"]))
    );
    // b saw the human edit
    assert_eq!(
        b.history().await[0].state.get("log"),
        Some(&json!(["a", "approved"]))
    );
}

#[tokio::test]
async fn test_resume_with_patch() {
    let (a, b, c) = steps();
    let app = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::new().interrupt_before("c"),
    );
    app.invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();

    let outcome = app
        .resume("s1", Some(PartialState::new().with("log", "patched")))
        .await
        .unwrap();
    assert_eq!(
        outcome.state().get("log"),
        Some(&json!(["a", "b", "patched", "c"]))
    );
    let sources: Vec<CheckpointSource> = app
        .get_state_history("s1")
        .await
        .unwrap()
        .iter()
        .map(|c| c.source)
        .collect();
    assert_eq!(sources[1], CheckpointSource::Update);
}

#[tokio::test]
async fn test_pause_after_and_before_adjacent_steps() {
    let (a, b, c) = steps();
    let app = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::new().interrupt_after("a").interrupt_before("b"),
    );

    let first = app
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();
    assert_eq!(first.interrupt().unwrap().kind, InterruptKind::After);

    let second = app.resume("s1", None).await.unwrap();
    let handle = second.interrupt().unwrap();
    assert_eq!(handle.kind, InterruptKind::Before);
    assert_eq!(handle.step, "b");
    assert_step_called!(b, 0);

    let third = app.resume("s1", None).await.unwrap();
    assert!(third.is_completed());
    assert_step_called!(a, 1);
    assert_step_called!(b, 1);
}

#[tokio::test]
async fn test_pause_before_entry_step() {
    let (a, b, c) = steps();
    let app = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::new().interrupt_before("a"),
    );

    let outcome = app
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();
    let handle = outcome.interrupt().unwrap();
    assert_eq!(handle.version, 1);
    assert_eq!(handle.step, "a");
    assert_step_called!(a, 0);

    let done = app.resume("s1", None).await.unwrap();
    assert_eq!(done.state().get("log"), Some(&json!(["a", "b", "c"])));
}

#[tokio::test]
async fn test_resume_completed_session_is_a_no_op() {
    let (a, b, c) = steps();
    let app = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::default(),
    );
    let finished = app
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();
    let version = app.get_state("s1").await.unwrap().version;

    let again = app.resume("s1", None).await.unwrap();
    assert_eq!(again, RunOutcome::Completed(finished.into_state()));
    assert_eq!(app.get_state("s1").await.unwrap().version, version);
    assert_step_called!(a, 1);

    assert!(matches!(
        app.resume("unknown", None).await,
        Err(GraphError::CheckpointNotFound(_))
    ));
}

#[tokio::test]
async fn test_interrupt_graph_needs_a_session() {
    let (a, b, c) = steps();
    let app = pipeline(
        [a.arc(), b.arc(), c.arc()],
        Arc::new(InMemoryCheckpointStore::new()),
        GraphConfig::new().interrupt_before("b"),
    );
    assert!(matches!(
        app.invoke(PartialState::new(), RunConfig::new()).await,
        Err(GraphError::SessionRequired(_))
    ));
    assert_step_called!(a, 0);
}

#[tokio::test]
async fn test_iteration_budget_carries_across_resume() {
    let step = increment();
    let app = counter_graph(
        &step,
        Some(Arc::new(InMemoryCheckpointStore::new())),
        GraphConfig::new()
            .with_max_steps(3)
            .interrupt_after("increment"),
    );

    let mut outcome = app
        .invoke(counter_input(0, 10), RunConfig::session("s1"))
        .await
        .unwrap();
    for _ in 0..2 {
        assert!(outcome.is_interrupted());
        outcome = app.resume("s1", None).await.unwrap();
    }
    assert_eq!(outcome.state().get("counter"), Some(&json!(3)));

    let err = app.resume("s1", None).await.unwrap_err();
    assert!(matches!(
        err,
        GraphError::IterationLimitExceeded { limit: 3, .. }
    ));
    assert_step_called!(step, 3);

    // a fresh invoke starts a new logical run with a fresh budget
    let restarted = app
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap();
    assert_eq!(restarted.state().get("counter"), Some(&json!(4)));
}
