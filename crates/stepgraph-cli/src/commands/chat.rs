//! `stepgraph chat`: conversation memory per session.
//!
//! Every invocation on the same session appends to the stored `messages`,
//! so each session sees only its own history.

use std::sync::Arc;
use stepgraph_foundation::{CompiledGraphImpl, InMemoryCheckpointStore, StateGraphImpl};
use stepgraph_kernel::error::GraphResult;
use stepgraph_kernel::workflow::{
    FieldType, GraphConfig, PartialState, RunConfig, START, State, StateSchema, StepContext,
};

use crate::output::{self, OutputFormat};

pub fn build(config: GraphConfig, store: Arc<InMemoryCheckpointStore>) -> GraphResult<CompiledGraphImpl> {
    let schema = StateSchema::new("Conversation")
        .append("messages")
        .field("turns", FieldType::Integer);

    let mut graph = StateGraphImpl::new("chat", schema);
    graph
        .add_async_step("respond", |state: State, ctx: StepContext| async move {
            let messages = state.get_as::<Vec<String>>("messages").unwrap_or_default();
            let turns = state.get_as::<i64>("turns").unwrap_or(0) + 1;
            let last = messages.last().cloned().unwrap_or_default();
            let reply = format!(
                "assistant[{}]: turn {} heard \"{}\" ({} messages in memory)",
                ctx.session_id.as_deref().unwrap_or("-"),
                turns,
                last.trim_start_matches("user: "),
                messages.len()
            );
            Ok(PartialState::new().with("messages", reply).with("turns", turns))
        })?
        .add_edge(START, "respond")
        .set_finish_point("respond")
        .with_config(config)
        .with_checkpointer(store);
    graph.compile()
}

pub async fn run(
    config: GraphConfig,
    sessions: &[String],
    messages: &[String],
    format: OutputFormat,
) -> anyhow::Result<()> {
    let app = build(config, Arc::new(InMemoryCheckpointStore::new()))?;

    for message in messages {
        for session in sessions {
            let input = PartialState::new().with("messages", format!("user: {}", message));
            app.invoke(input, RunConfig::session(session.as_str())).await?;
        }
    }

    for session in sessions {
        let checkpoint = app.get_state(session).await?;
        output::print_state(&format!("Session '{}'", session), &checkpoint.state, format)?;
    }
    Ok(())
}
