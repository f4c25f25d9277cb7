//! StateGraph builder
//!
//! Assembles steps, edges, configuration and an optional checkpointer, and
//! validates everything at [`StateGraphImpl::compile`] time so that a
//! compiled graph never fails on structure at run time.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use stepgraph_kernel::checkpoint::CheckpointStore;
use stepgraph_kernel::error::{GraphError, GraphResult, StepError};
use stepgraph_kernel::workflow::{
    AsyncFnStep, FnStep, GraphConfig, PartialState, Router, State, StateSchema, Step,
    StepContext, StepRegistry, TransitionTable, END,
};

use super::compiled::CompiledGraphImpl;

/// StateGraph builder
///
/// # Example
///
/// ```rust,ignore
/// use stepgraph_foundation::workflow::StateGraphImpl;
/// use stepgraph_kernel::workflow::{FieldType, PartialState, StateSchema, START, END};
///
/// let schema = StateSchema::new("Counter")
///     .field("counter", FieldType::Integer)
///     .field("limit", FieldType::Integer);
///
/// let mut graph = StateGraphImpl::new("counter", schema);
/// graph
///     .add_fn_step("increment", |state| {
///         let counter = state.get_as::<i64>("counter").unwrap_or(0);
///         Ok(PartialState::new().with("counter", counter + 1))
///     })?
///     .add_edge(START, "increment")
///     .add_conditional_edges(
///         "increment",
///         |state| if state.get_as::<i64>("counter") < state.get_as::<i64>("limit") { "again" } else { "done" },
///         [("again", "increment"), ("done", END)],
///     );
/// let app = graph.compile()?;
/// ```
pub struct StateGraphImpl {
    id: String,
    schema: StateSchema,
    steps: StepRegistry,
    table: TransitionTable,
    config: GraphConfig,
    checkpointer: Option<Arc<dyn CheckpointStore>>,
}

impl StateGraphImpl {
    /// Create a new builder over the given schema
    pub fn new(id: impl Into<String>, schema: StateSchema) -> Self {
        Self {
            id: id.into(),
            schema,
            steps: StepRegistry::new(),
            table: TransitionTable::new(),
            config: GraphConfig::default(),
            checkpointer: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn edge_count(&self) -> usize {
        self.table.edge_count()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.names()
    }

    /// Register a step; a name may only be registered once
    pub fn add_step(&mut self, name: impl Into<String>, step: Arc<dyn Step>) -> GraphResult<&mut Self> {
        let name = name.into();
        debug!("Adding step '{}' to graph '{}'", name, self.id);
        self.steps.register(name, step)?;
        Ok(self)
    }

    /// Register a synchronous closure as a step
    pub fn add_fn_step<F>(&mut self, name: impl Into<String>, func: F) -> GraphResult<&mut Self>
    where
        F: Fn(&State) -> Result<PartialState, StepError> + Send + Sync + 'static,
    {
        let name = name.into();
        let step = Arc::new(FnStep::new(name.clone(), func));
        self.add_step(name, step)
    }

    /// Register an async closure as a step
    pub fn add_async_step<F, Fut>(&mut self, name: impl Into<String>, func: F) -> GraphResult<&mut Self>
    where
        F: Fn(State, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PartialState, StepError>> + Send + 'static,
    {
        let name = name.into();
        let step = Arc::new(AsyncFnStep::new(name.clone(), func));
        self.add_step(name, step)
    }

    pub fn set_entry_point(&mut self, step: impl Into<String>) -> &mut Self {
        let step = step.into();
        debug!("Setting entry point to '{}'", step);
        self.table.set_entry(step);
        self
    }

    /// Add a static edge; `START -> step` sets the entry point
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        debug!("Adding edge: {} -> {}", from, to);
        self.table.add_edge(from, to);
        self
    }

    /// Add a conditional edge: `router(state)` picks a label, `routes` maps
    /// each label to a step name or [`END`]
    pub fn add_conditional_edges<R, L, K, V>(
        &mut self,
        from: impl Into<String>,
        router: R,
        routes: impl IntoIterator<Item = (K, V)>,
    ) -> &mut Self
    where
        R: Fn(&State) -> L + Send + Sync + 'static,
        L: Into<String>,
        K: Into<String>,
        V: Into<String>,
    {
        let from = from.into();
        let routes: BTreeMap<String, String> = routes
            .into_iter()
            .map(|(label, to)| (label.into(), to.into()))
            .collect();
        debug!("Adding conditional edges from '{}': {:?}", from, routes);
        let router: Arc<dyn Router> = Arc::new(router);
        self.table.add_conditional_edge(from, router, routes);
        self
    }

    /// Finish the run after `step`
    pub fn set_finish_point(&mut self, step: impl Into<String>) -> &mut Self {
        let step = step.into();
        debug!("Setting finish point at '{}'", step);
        self.table.add_edge(step, END);
        self
    }

    pub fn with_config(&mut self, config: GraphConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Persist sessions into `store`
    pub fn with_checkpointer(&mut self, store: Arc<dyn CheckpointStore>) -> &mut Self {
        self.checkpointer = Some(store);
        self
    }

    /// Validate the graph structure, schema and configuration
    pub fn validate(&self) -> GraphResult<()> {
        self.schema.validate()?;

        if self.steps.is_empty() {
            return Err(GraphError::MalformedGraph(format!(
                "graph '{}' has no steps",
                self.id
            )));
        }
        self.table.validate(&self.steps)?;

        if self.config.max_steps == 0 {
            return Err(GraphError::MalformedGraph(
                "max_steps must be at least 1".to_string(),
            ));
        }

        let mut errors = Vec::new();
        for step in self
            .config
            .interrupt_before
            .iter()
            .chain(self.config.interrupt_after.iter())
        {
            if !self.steps.contains(step) {
                errors.push(format!("interrupt point '{}' is not a registered step", step));
            }
        }
        if self.config.has_interrupts() && self.checkpointer.is_none() {
            errors.push("interrupt points require a checkpointer".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GraphError::MalformedGraph(errors.join("; ")))
        }
    }

    /// Compile the graph into an executable form
    pub fn compile(self) -> GraphResult<CompiledGraphImpl> {
        info!("Compiling graph '{}'", self.id);
        self.validate()?;

        let entry = self
            .table
            .entry()
            .map(str::to_string)
            .ok_or_else(|| GraphError::MalformedGraph("No entry point set".to_string()))?;

        info!(
            graph = %self.id,
            steps = self.steps.len(),
            durable = self.checkpointer.is_some(),
            "Graph compiled"
        );
        Ok(CompiledGraphImpl::new(
            self.id,
            self.schema,
            self.steps,
            self.table,
            entry,
            self.config,
            self.checkpointer,
        ))
    }
}
