//! StepGraph Kernel
//!
//! Contracts of a durable state-graph engine: state and schema, merge
//! policies, steps, the transition table, checkpoints and the error
//! taxonomy. Concrete implementations (executor, in-memory store) live in
//! `stepgraph-foundation`.

// error module
pub mod error;

// workflow module
pub mod workflow;
pub use workflow::*;

// checkpoint module
pub mod checkpoint;
pub use checkpoint::{Checkpoint, CheckpointSource, CheckpointStore, InterruptKind, RunStatus};

// config module
#[cfg(feature = "config")]
pub mod config;

pub use error::{ErrorClass, ErrorSite, GraphError, GraphResult, KernelError, KernelResult, StepError};
