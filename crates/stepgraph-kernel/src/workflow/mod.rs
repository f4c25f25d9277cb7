//! Workflow Module
//!
//! Contracts of the state-graph engine:
//!
//! - **State & Schema**: typed fields, each with a merge policy
//! - **Reducers**: how a step's partial output folds into the running state
//! - **Steps**: async units of work behind the [`Step`] trait
//! - **Transition Table**: static and conditional edges, self-loops, [`END`]
//! - **Run configuration**: iteration budget, timeouts, interrupt points,
//!   cancellation
//!
//! The executor itself lives in `stepgraph-foundation`.
//!
//! # Example
//!
//! ```rust,ignore
//! use stepgraph_foundation::StateGraphImpl;
//! use stepgraph_kernel::workflow::{FieldType, PartialState, State, StateSchema, START, END};
//!
//! let schema = StateSchema::new("Counter")
//!     .field("counter", FieldType::Integer)
//!     .field("limit", FieldType::Integer);
//!
//! let mut graph = StateGraphImpl::new("counter", schema);
//! graph
//!     .add_fn_step("increment", |state: &State| {
//!         let counter = state.get_as::<i64>("counter").unwrap_or(0);
//!         Ok(PartialState::new().with("counter", counter + 1))
//!     })?
//!     .add_edge(START, "increment")
//!     .add_conditional_edges(
//!         "increment",
//!         |state: &State| {
//!             let counter = state.get_as::<i64>("counter").unwrap_or(0);
//!             let limit = state.get_as::<i64>("limit").unwrap_or(0);
//!             if counter < limit { "again" } else { "done" }
//!         },
//!         [("again", "increment"), ("done", END)],
//!     );
//! let app = graph.compile()?;
//! ```

pub mod cancel;
pub mod context;
pub mod graph;
pub mod outcome;
pub mod reducer;
pub mod state;
pub mod step;

pub use cancel::CancelToken;
pub use context::{DEFAULT_MAX_STEPS, GraphConfig, RunConfig};
pub use graph::{END, Edge, Router, START, Transition, TransitionTable};
pub use outcome::{InterruptHandle, RunOutcome, StepOutcome, StreamEvent};
pub use reducer::{ReducerKind, merge};
pub use state::{FieldType, PartialState, State, StateField, StateSchema};
pub use step::{AsyncFnStep, FnStep, Step, StepContext, StepRegistry};
