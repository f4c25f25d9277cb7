//! StepGraph Foundation
//!
//! Graph builder, run-loop executor and in-memory checkpoint store.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stepgraph_foundation::{InMemoryCheckpointStore, StateGraphImpl};
//! use stepgraph_kernel::workflow::{PartialState, RunConfig, START, State, StateSchema};
//!
//! let schema = StateSchema::new("Chat").append("messages");
//! let mut graph = StateGraphImpl::new("chat", schema);
//! graph
//!     // a single value appends one item to an append field
//!     .add_fn_step("reply", |_state: &State| {
//!         Ok(PartialState::new().with("messages", "hello"))
//!     })?
//!     .add_edge(START, "reply")
//!     .set_finish_point("reply")
//!     .with_checkpointer(Arc::new(InMemoryCheckpointStore::new()));
//! let app = graph.compile()?;
//!
//! let outcome = app
//!     .invoke(PartialState::new().with("messages", "hi"), RunConfig::session("thread-1"))
//!     .await?;
//! ```

pub mod checkpoint;
pub mod workflow;

pub use checkpoint::InMemoryCheckpointStore;
pub use workflow::{CompiledGraphImpl, GraphStream, SessionLease, SessionLeases, StateGraphImpl};
