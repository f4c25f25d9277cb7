//! Transition Table
//!
//! Static edges (`step -> step`) and conditional edges
//! (`step -> router(state) -> label -> step`), one entry step and the
//! reserved [`END`] marker. Each source step owns exactly one outgoing
//! resolution path; a step may be the target of many edges.
//!
//! Self-loops are legal and are how iterative and retry behaviour is
//! expressed. There is no cycle detection here: loop termination belongs to
//! routers plus the executor's iteration budget.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::{State, StepRegistry};
use crate::error::{GraphError, GraphResult};

/// Special node ID for the graph entry point
pub const START: &str = "__start__";

/// Special node ID for the graph exit point
pub const END: &str = "__end__";

/// Router function computing a label from the state
///
/// Blanket-implemented for `Fn(&State) -> impl Into<String>` closures.
pub trait Router: Send + Sync {
    fn route(&self, state: &State) -> String;
}

impl<F, L> Router for F
where
    F: Fn(&State) -> L + Send + Sync,
    L: Into<String>,
{
    fn route(&self, state: &State) -> String {
        self(state).into()
    }
}

/// Outgoing edge of a step
#[derive(Clone)]
pub enum Edge {
    /// Unconditional successor (a step name or [`END`])
    Static(String),
    /// Successor chosen by a router label
    Conditional {
        router: Arc<dyn Router>,
        routes: BTreeMap<String, String>,
    },
}

impl Edge {
    /// All possible successors
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Static(to) => vec![to.as_str()],
            Edge::Conditional { routes, .. } => routes.values().map(|s| s.as_str()).collect(),
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, Edge::Conditional { .. })
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Static(to) => f.debug_tuple("Static").field(to).finish(),
            Edge::Conditional { routes, .. } => f
                .debug_struct("Conditional")
                .field("routes", routes)
                .finish_non_exhaustive(),
        }
    }
}

/// Result of resolving a step's outgoing edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Continue with the named step
    Step(String),
    /// The run is complete
    End,
}

impl Transition {
    fn from_target(target: &str) -> Self {
        if target == END {
            Transition::End
        } else {
            Transition::Step(target.to_string())
        }
    }

    /// The pending step name, `None` at the end
    pub fn step(&self) -> Option<&str> {
        match self {
            Transition::Step(name) => Some(name),
            Transition::End => None,
        }
    }
}

/// Edges keyed by source step, plus the entry step
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    entry: Option<String>,
    edges: BTreeMap<String, Edge>,
    errors: Vec<String>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the entry step
    pub fn set_entry(&mut self, name: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = &self.entry {
            if existing != &name {
                self.errors.push(format!(
                    "entry point set twice ('{}' then '{}')",
                    existing, name
                ));
                return;
            }
        }
        self.entry = Some(name);
    }

    /// Add a static edge; `from == START` sets the entry step
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        if from == START {
            self.set_entry(to);
            return;
        }
        self.insert(from, Edge::Static(to));
    }

    /// Add a conditional edge; every label the router can return must be mapped
    pub fn add_conditional_edge(
        &mut self,
        from: impl Into<String>,
        router: Arc<dyn Router>,
        routes: BTreeMap<String, String>,
    ) {
        let from = from.into();
        if routes.is_empty() {
            self.errors
                .push(format!("conditional edge from '{}' has no labels", from));
            return;
        }
        self.insert(from, Edge::Conditional { router, routes });
    }

    /// Sugar for an edge to [`END`]
    pub fn add_terminal(&mut self, from: impl Into<String>) {
        self.add_edge(from, END);
    }

    fn insert(&mut self, from: String, edge: Edge) {
        if from == END {
            self.errors
                .push("the terminal marker cannot have outgoing edges".to_string());
            return;
        }
        if self.edges.contains_key(&from) {
            self.errors.push(format!(
                "step '{}' already has an outgoing edge; each step routes to exactly one destination",
                from
            ));
            return;
        }
        self.edges.insert(from, edge);
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Resolve the successor of `step` given the state it just produced
    pub fn resolve(&self, step: &str, state: &State) -> GraphResult<Transition> {
        match self.edges.get(step) {
            Some(Edge::Static(to)) => Ok(Transition::from_target(to)),
            Some(Edge::Conditional { router, routes }) => {
                let label = router.route(state);
                match routes.get(&label) {
                    Some(to) => Ok(Transition::from_target(to)),
                    None => Err(GraphError::RoutingError {
                        from: step.to_string(),
                        label,
                        expected: routes.keys().cloned().collect(),
                        site: None,
                    }),
                }
            }
            // compile() guarantees every reachable step has an edge
            None => Err(GraphError::MalformedGraph(format!(
                "step '{}' has no outgoing edge",
                step
            ))),
        }
    }

    /// Check the table against the registered steps
    pub fn validate(&self, registry: &StepRegistry) -> GraphResult<()> {
        let mut errors = self.errors.clone();

        let entry = match &self.entry {
            Some(entry) if registry.contains(entry) => Some(entry.as_str()),
            Some(entry) => {
                errors.push(format!("entry point '{}' is not a registered step", entry));
                None
            }
            None => {
                errors.push(
                    "No entry point set. Use set_entry_point() or add_edge(START, step)."
                        .to_string(),
                );
                None
            }
        };

        for (from, edge) in &self.edges {
            if !registry.contains(from) {
                errors.push(format!("edge source '{}' is not a registered step", from));
            }
            for target in edge.targets() {
                if target != END && !registry.contains(target) {
                    errors.push(format!(
                        "edge target '{}' (from '{}') is not a registered step",
                        target, from
                    ));
                }
            }
        }

        if let Some(entry) = entry {
            let reachable = self.reachable_from(entry);
            for name in registry.names() {
                if !reachable.contains(name) {
                    errors.push(format!("step '{}' is not reachable from entry point", name));
                } else if !self.edges.contains_key(name) {
                    errors.push(format!(
                        "step '{}' has no outgoing edge; add an edge to END to finish there",
                        name
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GraphError::MalformedGraph(errors.join("; ")))
        }
    }

    /// Find all steps reachable from a starting step
    fn reachable_from<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut reachable = HashSet::new();
        let mut stack = vec![start];

        while let Some(step) = stack.pop() {
            if !reachable.insert(step) {
                continue;
            }
            if let Some(edge) = self.edges.get(step) {
                for target in edge.targets() {
                    if target != END && !reachable.contains(target) {
                        stack.push(target);
                    }
                }
            }
        }

        reachable
    }
}
