//! `stepgraph counter`: a self-loop with a router that flips to the
//! terminal edge once `counter` reaches `limit`

use futures::StreamExt;
use std::sync::Arc;
use stepgraph_foundation::{CompiledGraphImpl, InMemoryCheckpointStore, StateGraphImpl};
use stepgraph_kernel::error::GraphResult;
use stepgraph_kernel::workflow::{
    END, FieldType, GraphConfig, PartialState, RunConfig, START, State, StateSchema,
};

use crate::output::{self, OutputFormat};

const SESSION: &str = "counter";

pub fn build(config: GraphConfig, store: Arc<InMemoryCheckpointStore>) -> GraphResult<CompiledGraphImpl> {
    let schema = StateSchema::new("Counter")
        .field("counter", FieldType::Integer)
        .field("limit", FieldType::Integer);

    let mut graph = StateGraphImpl::new("counter", schema);
    graph
        .add_fn_step("increment", |state: &State| {
            let counter = state.get_as::<i64>("counter").unwrap_or(0);
            Ok(PartialState::new().with("counter", counter + 1))
        })?
        .add_edge(START, "increment")
        .add_conditional_edges(
            "increment",
            |state: &State| {
                let counter = state.get_as::<i64>("counter").unwrap_or(0);
                let limit = state.get_as::<i64>("limit").unwrap_or(0);
                if counter < limit { "continue" } else { "finish" }
            },
            [("continue", "increment"), ("finish", END)],
        )
        .with_config(config)
        .with_checkpointer(store);
    graph.compile()
}

pub async fn run(
    config: GraphConfig,
    limit: i64,
    stream: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let app = build(config, Arc::new(InMemoryCheckpointStore::new()))?;
    let input = PartialState::new().with("counter", 0).with("limit", limit);

    if stream {
        let mut events = app.stream(Some(input), RunConfig::session(SESSION));
        while let Some(event) = events.next().await {
            output::print_event(&event, format)?;
        }
    } else {
        let outcome = app.invoke(input, RunConfig::session(SESSION)).await?;
        output::print_outcome(&outcome, format)?;
    }

    output::print_history(&app.get_state_history(SESSION).await?, format)
}
