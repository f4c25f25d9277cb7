//! Workflow Module
//!
//! Concrete state-graph engine over the `stepgraph-kernel` contracts:
//!
//! - [`StateGraphImpl`]: builder with compile-time validation
//! - [`CompiledGraphImpl`]: executor with invoke, resume, step-by-step
//!   execution, streaming, state inspection, updates and rollback
//! - [`SessionLeases`]: one active run per session

mod compiled;
mod session;
mod state_graph;

pub use compiled::{CompiledGraphImpl, GraphStream};
pub use session::{SessionLease, SessionLeases};
pub use state_graph::StateGraphImpl;
