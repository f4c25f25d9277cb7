#![allow(dead_code)]

use std::sync::Arc;

use stepgraph_foundation::{CompiledGraphImpl, InMemoryCheckpointStore, StateGraphImpl};
use stepgraph_kernel::workflow::{
    END, FieldType, GraphConfig, PartialState, START, State, StateSchema,
};
use stepgraph_testing::ScriptedStep;

pub fn counter_schema() -> StateSchema {
    StateSchema::new("Counter")
        .field("counter", FieldType::Integer)
        .field("limit", FieldType::Integer)
        .append("log")
}

pub fn counter_input(counter: i64, limit: i64) -> PartialState {
    PartialState::new().with("counter", counter).with("limit", limit)
}

pub fn counter_of(state: &State) -> i64 {
    state.get_as::<i64>("counter").unwrap_or_default()
}

/// `counter += 1`
pub fn increment() -> ScriptedStep {
    ScriptedStep::from_fn("increment", |state: &State| {
        Ok(PartialState::new().with("counter", counter_of(state) + 1))
    })
}

/// Self-loop on `step` while `counter < limit`
pub fn counter_graph(
    step: &ScriptedStep,
    store: Option<Arc<InMemoryCheckpointStore>>,
    config: GraphConfig,
) -> CompiledGraphImpl {
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
        .with_config(config);
    if let Some(store) = store {
        graph.with_checkpointer(store);
    }
    graph.compile().unwrap()
}

/// `a -> b -> c -> END`, each step appending its name to `log`
pub fn pipeline(
    steps: [Arc<dyn stepgraph_kernel::workflow::Step>; 3],
    store: Arc<InMemoryCheckpointStore>,
    config: GraphConfig,
) -> CompiledGraphImpl {
    let [a, b, c] = steps;
    let mut graph = StateGraphImpl::new("pipeline", counter_schema());
    graph
        .add_step("a", a)
        .unwrap()
        .add_step("b", b)
        .unwrap()
        .add_step("c", c)
        .unwrap()
        .add_edge(START, "a")
        .add_edge("a", "b")
        .add_edge("b", "c")
        .set_finish_point("c")
        .with_config(config)
        .with_checkpointer(store);
    graph.compile().unwrap()
}

pub fn logging(name: &'static str) -> ScriptedStep {
    ScriptedStep::returning(name, PartialState::new().with("log", vec![name]))
}
