//! Run-loop behaviour: loops, budgets, failures, timeouts and cancellation.

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{counter_graph, counter_input, counter_of, counter_schema, increment, logging, pipeline};
use stepgraph_foundation::{InMemoryCheckpointStore, StateGraphImpl};
use stepgraph_kernel::checkpoint::{Checkpoint, CheckpointSource, CheckpointStore, RunStatus};
use stepgraph_kernel::error::{ErrorClass, GraphError, GraphResult};
use stepgraph_kernel::workflow::{
    CancelToken, END, GraphConfig, PartialState, RunConfig, START, State,
};
use stepgraph_testing::{FailingStep, ScriptedStep, assert_step_called};

#[tokio::test]
async fn test_counter_reaches_limit_in_three_invocations() {
    let step = increment();
    let app = counter_graph(&step, None, GraphConfig::default());

    let outcome = app.invoke(counter_input(0, 3), RunConfig::new()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.state().get("counter"), Some(&json!(3)));
    assert_eq!(outcome.state().get("limit"), Some(&json!(3)));
    assert_step_called!(step, 3);

    // each call observed the state produced by the previous one
    let seen: Vec<i64> = step.history().await.iter().map(|c| counter_of(&c.state)).collect();
    assert_eq!(seen, vec![0, 1, 2]);
}

fn flip_after(n: i64, step: &ScriptedStep, config: GraphConfig) -> stepgraph_foundation::CompiledGraphImpl {
    let mut graph = StateGraphImpl::new("flip", counter_schema());
    graph
        .add_step("increment", step.arc())
        .unwrap()
        .add_edge(START, "increment")
        .add_conditional_edges(
            "increment",
            move |state: &State| if counter_of(state) <= n { "loop" } else { "done" },
            [("loop", "increment"), ("done", END)],
        )
        .with_config(config);
    graph.compile().unwrap()
}

#[tokio::test]
async fn test_self_loop_terminates_after_n_plus_one_calls() {
    for n in [0, 1, 4] {
        let step = increment();
        let app = flip_after(n, &step, GraphConfig::default());
        let outcome = app.invoke(PartialState::new(), RunConfig::new()).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(step.call_count().await, (n + 1) as usize, "n = {n}");
    }
}

#[tokio::test]
async fn test_router_that_never_flips_hits_the_ceiling() {
    let step = increment();
    let app = flip_after(i64::MAX - 1, &step, GraphConfig::new().with_max_steps(7));

    let err = app.invoke(PartialState::new(), RunConfig::new()).await.unwrap_err();

    match &err {
        GraphError::IterationLimitExceeded { limit, site } => {
            assert_eq!(*limit, 7);
            assert_eq!(site.step, "increment");
            assert_eq!(site.iteration, 7);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.class(), ErrorClass::Runtime);
    assert_step_called!(step, 7);
}

#[tokio::test]
async fn test_second_step_failure_keeps_first_step_output() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let a = logging("a");
    let b = FailingStep::on_call("b", 1, "downstream unavailable")
        .with_output(PartialState::new().with("log", vec!["b"]));
    let c = logging("c");
    let app = pipeline([a.arc(), b.arc(), c.arc()], store.clone(), GraphConfig::default());

    let err = app
        .invoke(PartialState::new(), RunConfig::session("s1"))
        .await
        .unwrap_err();

    let site = err.site().unwrap();
    assert_eq!(site.step, "b");
    assert_eq!(site.iteration, 1);
    assert_eq!(site.session_id.as_deref(), Some("s1"));
    assert!(matches!(err, GraphError::StepFailed { .. }));

    let latest = app.get_state("s1").await.unwrap();
    assert_eq!(latest.status, RunStatus::Failed);
    assert_eq!(latest.state.get("log"), Some(&json!(["a"])));
    assert_eq!(latest.next_step.as_deref(), Some("b"));

    let history = app.get_state_history("s1").await.unwrap();
    let versions: Vec<(u64, RunStatus)> = history.iter().map(|c| (c.version, c.status)).collect();
    assert_eq!(
        versions,
        vec![
            (3, RunStatus::Failed),
            (2, RunStatus::Running),
            (1, RunStatus::Running),
        ]
    );
    assert_eq!(history[2].source, CheckpointSource::Input);
    assert_step_called!(c, 0);

    // the failed step is still pending, so resuming retries it
    let outcome = app.resume("s1", None).await.unwrap();
    assert_eq!(outcome.state().get("log"), Some(&json!(["a", "b", "c"])));
    assert_step_called!(a, 1);
    assert_step_called!(b, 2);
    assert_step_called!(c, 1);
}

#[tokio::test]
async fn test_undeclared_label_is_a_routing_error() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let step = increment();
    let mut graph = StateGraphImpl::new("sideways", counter_schema());
    graph
        .add_step("increment", step.arc())
        .unwrap()
        .add_edge(START, "increment")
        .add_conditional_edges(
            "increment",
            |_state: &State| "sideways",
            [("loop", "increment"), ("done", END)],
        )
        .with_checkpointer(store);
    let app = graph.compile().unwrap();

    let err = app
        .invoke(counter_input(0, 3), RunConfig::session("s1"))
        .await
        .unwrap_err();
    match &err {
        GraphError::RoutingError { from, label, expected, site } => {
            assert_eq!(from, "increment");
            assert_eq!(label, "sideways");
            assert_eq!(expected, &vec!["done".to_string(), "loop".to_string()]);
            assert_eq!(site.as_ref().unwrap().step, "increment");
        }
        other => panic!("unexpected error: {other}"),
    }

    // the step's output is not committed without a successor
    let latest = app.get_state("s1").await.unwrap();
    assert_eq!(latest.status, RunStatus::Failed);
    assert_eq!(counter_of(&latest.state), 0);
    assert_eq!(latest.next_step.as_deref(), Some("increment"));
}

#[tokio::test]
async fn test_step_output_breaking_the_schema_aborts() {
    let bad_field = ScriptedStep::returning("bad", PartialState::new().with("ghost", 1));
    let mut graph = StateGraphImpl::new("schema", counter_schema());
    graph
        .add_step("bad", bad_field.arc())
        .unwrap()
        .set_entry_point("bad")
        .set_finish_point("bad");
    let app = graph.compile().unwrap();

    let err = app.invoke(PartialState::new(), RunConfig::new()).await.unwrap_err();
    match &err {
        GraphError::SchemaViolation { field, site, .. } => {
            assert_eq!(field, "ghost");
            assert_eq!(site.as_ref().unwrap().step, "bad");
        }
        other => panic!("unexpected error: {other}"),
    }

    let bad_type = ScriptedStep::returning("bad", PartialState::new().with("counter", "three"));
    let mut graph = StateGraphImpl::new("schema", counter_schema());
    graph
        .add_step("bad", bad_type.arc())
        .unwrap()
        .set_entry_point("bad")
        .set_finish_point("bad");
    let app = graph.compile().unwrap();
    assert!(matches!(
        app.invoke(PartialState::new(), RunConfig::new()).await,
        Err(GraphError::SchemaViolation { .. })
    ));
}

#[tokio::test]
async fn test_run_timeout_records_failure() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let step = increment().with_delay(Duration::from_millis(40));
    let app = counter_graph(
        &step,
        Some(store),
        GraphConfig::new().with_run_timeout(100).with_max_steps(100),
    );

    let err = app
        .invoke(counter_input(0, 50), RunConfig::session("slow"))
        .await
        .unwrap_err();
    match &err {
        GraphError::Timeout { duration_ms, site } => {
            assert_eq!(*duration_ms, 100);
            assert_eq!(site.as_ref().unwrap().step, "increment");
        }
        other => panic!("unexpected error: {other}"),
    }

    let latest = app.get_state("slow").await.unwrap();
    assert_eq!(latest.status, RunStatus::Failed);
    // only completed steps were committed
    let calls = step.call_count().await as i64;
    assert_eq!(counter_of(&latest.state), calls - 1);
}

/// Store whose writes land immediately but return late
struct SlowSaveStore {
    inner: InMemoryCheckpointStore,
    delay: Duration,
}

#[async_trait]
impl CheckpointStore for SlowSaveStore {
    async fn save(&self, checkpoint: Checkpoint) -> GraphResult<()> {
        self.inner.save(checkpoint).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> GraphResult<Checkpoint> {
        self.inner.load(session_id).await
    }

    async fn load_version(&self, session_id: &str, version: u64) -> GraphResult<Checkpoint> {
        self.inner.load_version(session_id, version).await
    }

    async fn history(&self, session_id: &str) -> GraphResult<Vec<Checkpoint>> {
        self.inner.history(session_id).await
    }

    async fn delete(&self, session_id: &str) -> GraphResult<bool> {
        self.inner.delete(session_id).await
    }

    async fn sessions(&self) -> GraphResult<Vec<String>> {
        self.inner.sessions().await
    }
}

#[tokio::test]
async fn test_run_timeout_during_checkpoint_write_still_records_failure() {
    let step = increment();
    let store = Arc::new(SlowSaveStore {
        inner: InMemoryCheckpointStore::new(),
        delay: Duration::from_millis(80),
    });
    let mut graph = StateGraphImpl::new("counter", counter_schema());
    graph
        .add_step("increment", step.arc())
        .unwrap()
        .add_edge(START, "increment")
        .add_conditional_edges(
            "increment",
            |state: &State| {
                let limit = state.get_as::<i64>("limit").unwrap_or_default();
                if counter_of(state) < limit { "continue" } else { "finish" }
            },
            [("continue", "increment"), ("finish", END)],
        )
        .with_config(GraphConfig::new().with_run_timeout(50))
        .with_checkpointer(store);
    let app = graph.compile().unwrap();

    let err = app
        .invoke(counter_input(0, 5), RunConfig::session("s1"))
        .await
        .unwrap_err();
    match &err {
        GraphError::Timeout { duration_ms, site } => {
            assert_eq!(*duration_ms, 50);
            assert_eq!(site.as_ref().unwrap().iteration, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    // the slow write of step one completed, and the abort was recorded after it
    let history = app.get_state_history("s1").await.unwrap();
    let statuses: Vec<(u64, RunStatus)> = history.iter().map(|c| (c.version, c.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (3, RunStatus::Failed),
            (2, RunStatus::Running),
            (1, RunStatus::Running),
        ]
    );
    assert_eq!(counter_of(&history[0].state), 1);
    assert_step_called!(step, 1);
}

#[tokio::test]
async fn test_cancel_between_steps() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let cancel = CancelToken::new();
    let step = {
        let cancel = cancel.clone();
        ScriptedStep::from_fn("increment", move |state: &State| {
            cancel.cancel();
            Ok(PartialState::new().with("counter", counter_of(state) + 1))
        })
    };
    let app = counter_graph(&step, Some(store), GraphConfig::default());

    let err = app
        .invoke(
            counter_input(0, 10),
            RunConfig::session("s1").with_cancel(cancel),
        )
        .await
        .unwrap_err();

    match &err {
        GraphError::Cancelled { site } => assert_eq!(site.iteration, 1),
        other => panic!("unexpected error: {other}"),
    }
    assert_step_called!(step, 1);
    let latest = app.get_state("s1").await.unwrap();
    assert_eq!(latest.status, RunStatus::Failed);
    assert_eq!(counter_of(&latest.state), 1);
}

#[tokio::test]
async fn test_invoke_without_store_is_ephemeral() {
    let step = increment();
    let app = counter_graph(&step, None, GraphConfig::default());

    app.invoke(counter_input(0, 2), RunConfig::session("s1")).await.unwrap();
    let again = app.invoke(counter_input(0, 2), RunConfig::session("s1")).await.unwrap();

    assert_eq!(again.state().get("counter"), Some(&json!(2)));
    assert!(matches!(
        app.get_state("s1").await,
        Err(GraphError::SessionRequired(_))
    ));
}
