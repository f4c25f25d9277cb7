//! `stepgraph approval`: human-in-the-loop gate.
//!
//! `propose` drafts an action, the run pauses before `execute`, the
//! reviewer's decision is written with `update_state`, and the session is
//! resumed.

use std::sync::Arc;
use stepgraph_foundation::{CompiledGraphImpl, InMemoryCheckpointStore, StateGraphImpl};
use stepgraph_kernel::error::GraphResult;
use stepgraph_kernel::workflow::{
    FieldType, GraphConfig, PartialState, RunConfig, START, State, StateSchema,
};

use crate::output::{self, OutputFormat};

const SESSION: &str = "approval";

pub fn schema() -> StateSchema {
    StateSchema::new("Approval")
        .field("request", FieldType::String)
        .field("action", FieldType::String)
        .field("approved", FieldType::Bool)
        .field("note", FieldType::String)
        .field("result", FieldType::String)
        .append("log")
}

pub fn build(config: GraphConfig, store: Arc<InMemoryCheckpointStore>) -> GraphResult<CompiledGraphImpl> {
    let mut graph = StateGraphImpl::new("approval", schema());
    graph
        .add_fn_step("propose", |state: &State| {
            let request = state
                .get_as::<String>("request")
                .unwrap_or_else(|| "clean up stale records".to_string());
            Ok(PartialState::new()
                .with("action", format!("run '{}' against production", request))
                .with("log", "action proposed"))
        })?
        .add_fn_step("execute", |state: &State| {
            let action = state.get_as::<String>("action").unwrap_or_default();
            let update = if state.get_as::<bool>("approved").unwrap_or(false) {
                PartialState::new()
                    .with("result", format!("executed: {}", action))
                    .with("log", "action executed")
            } else {
                PartialState::new()
                    .with("result", "cancelled by reviewer")
                    .with("log", "action cancelled")
            };
            Ok(update)
        })?
        .add_edge(START, "propose")
        .add_edge("propose", "execute")
        .set_finish_point("execute")
        .with_config(config.interrupt_before("execute"))
        .with_checkpointer(store);
    graph.compile()
}

pub async fn run(
    config: GraphConfig,
    approve: bool,
    note: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let app = build(config, Arc::new(InMemoryCheckpointStore::new()))?;

    let outcome = app
        .invoke(
            PartialState::new().with("request", "clean up stale records"),
            RunConfig::session(SESSION),
        )
        .await?;
    output::print_outcome(&outcome, format)?;

    let mut decision = PartialState::new().with("approved", approve);
    if let Some(note) = note {
        decision.set("note", note);
    }
    let updated = app.update_state(SESSION, decision).await?;
    output::print_state("Reviewer decision applied", &updated.state, format)?;

    let outcome = app.resume(SESSION, None).await?;
    output::print_outcome(&outcome, format)?;
    output::print_history(&app.get_state_history(SESSION).await?, format)
}
