//! Steps and the Step Registry
//!
//! A step is the atomic unit of work: it observes the full running
//! [`State`] and expresses its changes only through the returned
//! [`PartialState`]. External collaborators are injected by closure capture
//! or constructor arguments, never through globals.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{PartialState, State};
use crate::error::{GraphError, GraphResult, StepError};

/// Read-only execution metadata handed to a step
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Graph ID
    pub graph_id: String,
    /// Unique ID of the current `invoke`/`resume` call
    pub execution_id: String,
    /// Session ID, when the run is durable
    pub session_id: Option<String>,
    /// Name of the step being invoked
    pub step: String,
    /// Step invocations completed so far in this logical run
    pub iteration: u32,
}

/// Step trait
///
/// Implement this trait to define a step.
///
/// # Example
///
/// ```rust,ignore
/// struct Increment;
///
/// #[async_trait]
/// impl Step for Increment {
///     async fn run(&self, state: &State, _ctx: &StepContext) -> Result<PartialState, StepError> {
///         let counter = state.get_as::<i64>("counter").unwrap_or(0);
///         Ok(PartialState::new().with("counter", counter + 1))
///     }
///
///     fn name(&self) -> &str {
///         "increment"
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    /// Execute the step against the current state
    async fn run(&self, state: &State, ctx: &StepContext) -> Result<PartialState, StepError>;

    /// Returns the step name
    fn name(&self) -> &str;

    /// Optional description of what this step does
    fn description(&self) -> Option<&str> {
        None
    }
}

/// Step backed by a synchronous closure
pub struct FnStep<F> {
    name: String,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&State) -> Result<PartialState, StepError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&State) -> Result<PartialState, StepError> + Send + Sync,
{
    async fn run(&self, state: &State, _ctx: &StepContext) -> Result<PartialState, StepError> {
        (self.func)(state)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Step backed by an async closure that receives an owned state snapshot
pub struct AsyncFnStep<F, Fut> {
    name: String,
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStep<F, Fut>
where
    F: Fn(State, StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PartialState, StepError>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Step for AsyncFnStep<F, Fut>
where
    F: Fn(State, StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PartialState, StepError>> + Send,
{
    async fn run(&self, state: &State, ctx: &StepContext) -> Result<PartialState, StepError> {
        (self.func)(state.clone(), ctx.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Mapping from step name to executable unit
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
    order: Vec<String>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step under `name`; each name may be registered once
    pub fn register(&mut self, name: impl Into<String>, step: Arc<dyn Step>) -> GraphResult<()> {
        let name = name.into();
        if name.is_empty() || name == super::START || name == super::END {
            return Err(GraphError::MalformedGraph(format!(
                "'{}' is not a valid step name",
                name
            )));
        }
        if self.steps.contains_key(&name) {
            return Err(GraphError::DuplicateStep(name));
        }
        self.order.push(name.clone());
        self.steps.insert(name, step);
        Ok(())
    }

    /// Look up a step by name
    pub fn resolve(&self, name: &str) -> GraphResult<Arc<dyn Step>> {
        self.steps
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownStep(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.order)
            .finish()
    }
}
