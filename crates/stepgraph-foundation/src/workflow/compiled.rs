//! Compiled graph executor
//!
//! Drives the run loop: resolve the pending step, invoke it, merge its
//! output, resolve the outgoing edge, persist a checkpoint, repeat until the
//! terminal marker, an interrupt point, or an error.
//!
//! A step's merged output and its successor are committed together. When a
//! run aborts, the last committed state is what the session keeps and the
//! failed step is still pending, so `resume` retries it.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use stepgraph_kernel::checkpoint::{
    Checkpoint, CheckpointSource, CheckpointStore, InterruptKind, RunStatus,
};
use stepgraph_kernel::error::{ErrorClass, ErrorSite, GraphError, GraphResult};
use stepgraph_kernel::workflow::{
    CancelToken, GraphConfig, InterruptHandle, PartialState, RunConfig, RunOutcome, State,
    StateSchema, Step, StepContext, StepOutcome, StepRegistry, StreamEvent, TransitionTable,
    merge,
};

use super::session::SessionLeases;

/// Boxed stream of run events
pub type GraphStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Compiled graph ready for execution
///
/// Cheap to clone; clones share steps, checkpointer and session leases.
#[derive(Clone)]
pub struct CompiledGraphImpl {
    inner: Arc<GraphInner>,
}

struct GraphInner {
    id: String,
    schema: StateSchema,
    steps: StepRegistry,
    table: TransitionTable,
    entry: String,
    config: GraphConfig,
    checkpointer: Option<Arc<dyn CheckpointStore>>,
    leases: SessionLeases,
}

/// Forwards events to a stream consumer, if any
#[derive(Default)]
struct Emitter {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

/// Mutable cursor of one `invoke` / `resume` / `step` call
struct Run {
    execution_id: String,
    session_id: Option<String>,
    durable: bool,
    state: State,
    next: Option<String>,
    iteration: u32,
    /// Latest persisted version, 0 if none
    version: u64,
    status: RunStatus,
    cancel: CancelToken,
    /// Whole-run deadline, checked between steps and bounding each step call
    deadline: Option<Instant>,
    events: Emitter,
}

impl Run {
    fn site(&self, step: &str) -> ErrorSite {
        ErrorSite::new(self.session_id.as_deref(), step, self.iteration)
    }

    fn from_checkpoint(
        checkpoint: &Checkpoint,
        cancel: CancelToken,
        events: Emitter,
    ) -> Self {
        Run {
            execution_id: Uuid::new_v4().to_string(),
            session_id: Some(checkpoint.session_id.clone()),
            durable: true,
            state: checkpoint.state.clone(),
            next: checkpoint.next_step.clone(),
            iteration: checkpoint.iteration,
            version: checkpoint.version,
            status: checkpoint.status,
            cancel,
            deadline: None,
            events,
        }
    }

    /// Deliver an event; a dropped receiver cancels the run at the next boundary
    async fn emit(&mut self, event: StreamEvent) {
        let dropped = match &self.events.tx {
            Some(tx) => tx.send(event).await.is_err(),
            None => false,
        };
        if dropped {
            warn!(
                execution_id = %self.execution_id,
                "Stream receiver dropped; cancelling graph execution"
            );
            self.events.tx = None;
            self.cancel.cancel();
        }
    }
}

impl CompiledGraphImpl {
    pub(crate) fn new(
        id: String,
        schema: StateSchema,
        steps: StepRegistry,
        table: TransitionTable,
        entry: String,
        config: GraphConfig,
        checkpointer: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                id,
                schema,
                steps,
                table,
                entry,
                config,
                checkpointer,
                leases: SessionLeases::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> &StateSchema {
        &self.inner.schema
    }

    pub fn entry_point(&self) -> &str {
        &self.inner.entry
    }

    /// Run the graph from the entry step.
    ///
    /// `input` is merged into the session's stored state when the session
    /// already has checkpoints, otherwise into the schema defaults.
    pub async fn invoke(&self, input: PartialState, config: RunConfig) -> GraphResult<RunOutcome> {
        self.inner.start(input, config, Emitter::default()).await
    }

    /// Continue a session from its latest checkpoint, optionally patching
    /// the state first
    pub async fn resume(
        &self,
        session_id: &str,
        patch: Option<PartialState>,
    ) -> GraphResult<RunOutcome> {
        self.resume_with(patch, RunConfig::session(session_id)).await
    }

    /// [`resume`](Self::resume) with an explicit run configuration
    pub async fn resume_with(
        &self,
        patch: Option<PartialState>,
        config: RunConfig,
    ) -> GraphResult<RunOutcome> {
        let session_id = config.session_id.clone().ok_or_else(|| {
            GraphError::SessionRequired("resume needs a session id".to_string())
        })?;
        self.inner
            .resume(&session_id, patch, config.cancel, Emitter::default())
            .await
    }

    /// Execute exactly one step of a session and persist it.
    ///
    /// Starts a new run from the entry step when the session is unknown or
    /// completed and `input` is given.
    pub async fn step(
        &self,
        input: Option<PartialState>,
        session_id: &str,
    ) -> GraphResult<StepOutcome> {
        self.inner.step(input, session_id).await
    }

    /// Run the graph and stream its events.
    ///
    /// With `input == None` the session named in `config` is resumed instead.
    pub fn stream(&self, input: Option<PartialState>, config: RunConfig) -> GraphStream {
        let inner = self.inner.clone();
        let (tx, rx) = mpsc::channel(100);

        let stream_span = tracing::info_span!("state_graph.stream", graph = %inner.id);
        tokio::spawn(
            async move {
                let events = Emitter {
                    tx: Some(tx.clone()),
                };
                let result = match (input, config.session_id.clone()) {
                    (Some(input), _) => inner.start(input, config, events).await,
                    (None, Some(session_id)) => {
                        inner.resume(&session_id, None, config.cancel, events).await
                    }
                    (None, None) => Err(GraphError::SessionRequired(
                        "streaming without input resumes a session; pass a session id"
                            .to_string(),
                    )),
                };
                if let Err(err) = result {
                    let step = err.site().map(|site| site.step.clone());
                    if tx
                        .send(StreamEvent::Error {
                            step,
                            error: Arc::new(err),
                        })
                        .await
                        .is_err()
                    {
                        debug!("Stream receiver dropped before error event");
                    }
                }
            }
            .instrument(stream_span),
        );

        Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
    }

    /// Latest checkpoint of a session
    pub async fn get_state(&self, session_id: &str) -> GraphResult<Checkpoint> {
        self.inner.store()?.load(session_id).await
    }

    /// All checkpoints of a session, newest first
    pub async fn get_state_history(&self, session_id: &str) -> GraphResult<Vec<Checkpoint>> {
        self.inner.store()?.history(session_id).await
    }

    /// Merge `patch` into the session's latest state as a new version
    pub async fn update_state(
        &self,
        session_id: &str,
        patch: PartialState,
    ) -> GraphResult<Checkpoint> {
        self.inner.update_state(session_id, patch).await
    }

    /// Copy a historical version forward as the newest checkpoint
    pub async fn rollback(&self, session_id: &str, version: u64) -> GraphResult<Checkpoint> {
        self.inner.rollback(session_id, version).await
    }

    /// Drop every checkpoint of a session
    pub async fn delete_session(&self, session_id: &str) -> GraphResult<bool> {
        let store = self.inner.store()?;
        let _lease = self.inner.leases.acquire(session_id)?;
        let deleted = store.delete(session_id).await?;
        info!(graph = %self.inner.id, session = session_id, deleted, "Session deleted");
        Ok(deleted)
    }
}

impl std::fmt::Debug for CompiledGraphImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraphImpl")
            .field("id", &self.inner.id)
            .field("entry", &self.inner.entry)
            .field("steps", &self.inner.steps)
            .field("config", &self.inner.config)
            .field("durable", &self.inner.checkpointer.is_some())
            .finish()
    }
}

impl GraphInner {
    fn store(&self) -> GraphResult<&Arc<dyn CheckpointStore>> {
        self.checkpointer.as_ref().ok_or_else(|| {
            GraphError::SessionRequired(format!("graph '{}' has no checkpointer", self.id))
        })
    }

    async fn start(
        &self,
        input: PartialState,
        config: RunConfig,
        events: Emitter,
    ) -> GraphResult<RunOutcome> {
        let RunConfig { session_id, cancel } = config;
        if session_id.is_none() && self.config.has_interrupts() {
            return Err(GraphError::SessionRequired(format!(
                "graph '{}' has interrupt points; pass a session id",
                self.id
            )));
        }
        let _lease = match &session_id {
            Some(id) => Some(self.leases.acquire(id)?),
            None => None,
        };
        let durable = session_id.is_some() && self.checkpointer.is_some();

        let (base, version) = match (&session_id, durable) {
            (Some(id), true) => match self.store()?.latest(id).await? {
                Some(checkpoint) => (checkpoint.state, checkpoint.version),
                None => (self.schema.initial_state(), 0),
            },
            _ => (self.schema.initial_state(), 0),
        };
        let state = merge(&base, &input, &self.schema)?;

        let mut run = Run {
            execution_id: Uuid::new_v4().to_string(),
            session_id,
            durable,
            state,
            next: Some(self.entry.clone()),
            iteration: 0,
            version,
            status: RunStatus::Running,
            cancel,
            deadline: None,
            events,
        };

        info!(
            "Starting graph execution '{}' with execution_id={}",
            self.id, run.execution_id
        );
        run.emit(StreamEvent::RunStart {
            execution_id: run.execution_id.clone(),
            session_id: run.session_id.clone(),
            entry: self.entry.clone(),
        })
        .await;

        if run.durable {
            let pause = self
                .config
                .pauses_before(&self.entry)
                .then_some(InterruptKind::Before);
            self.persist(&mut run, CheckpointSource::Input, pause).await?;
            if let Some(kind) = pause {
                let entry = self.entry.clone();
                return Ok(self.interrupt(&mut run, kind, &entry).await);
            }
        }

        self.drive(&mut run).await
    }

    async fn resume(
        &self,
        session_id: &str,
        patch: Option<PartialState>,
        cancel: CancelToken,
        events: Emitter,
    ) -> GraphResult<RunOutcome> {
        let store = self.store()?;
        let _lease = self.leases.acquire(session_id)?;
        let checkpoint = store.load(session_id).await?;
        let mut run = Run::from_checkpoint(&checkpoint, cancel, events);

        if let Some(patch) = patch {
            run.state = merge(&run.state, &patch, &self.schema)?;
            let pause = checkpoint.interrupt.filter(|_| run.next.is_some());
            self.persist(&mut run, CheckpointSource::Update, pause).await?;
        }

        let Some(next) = run.next.clone() else {
            debug!(session = session_id, "Session already completed");
            return Ok(self.complete(&mut run).await);
        };
        // Paused after a step whose successor also pauses before: honour both
        if checkpoint.interrupt == Some(InterruptKind::After) && self.config.pauses_before(&next) {
            self.persist(&mut run, CheckpointSource::Loop, Some(InterruptKind::Before))
                .await?;
            return Ok(self.interrupt(&mut run, InterruptKind::Before, &next).await);
        }

        info!(
            graph = %self.id,
            session = session_id,
            version = checkpoint.version,
            from = %next,
            status = %checkpoint.status,
            "Resuming graph execution"
        );
        run.emit(StreamEvent::RunStart {
            execution_id: run.execution_id.clone(),
            session_id: run.session_id.clone(),
            entry: next,
        })
        .await;

        self.drive(&mut run).await
    }

    async fn step(&self, input: Option<PartialState>, session_id: &str) -> GraphResult<StepOutcome> {
        let store = self.store()?;
        let _lease = self.leases.acquire(session_id)?;
        let latest = store.latest(session_id).await?;

        let mut run = match latest {
            Some(checkpoint) if checkpoint.status != RunStatus::Completed => {
                let mut run =
                    Run::from_checkpoint(&checkpoint, CancelToken::new(), Emitter::default());
                if let Some(input) = input {
                    run.state = merge(&run.state, &input, &self.schema)?;
                }
                run
            }
            Some(checkpoint) if input.is_none() => {
                return Ok(StepOutcome {
                    executed: None,
                    state: checkpoint.state,
                    next_step: None,
                    status: checkpoint.status,
                    version: checkpoint.version,
                });
            }
            latest => {
                let (base, version) = match latest {
                    Some(checkpoint) => (checkpoint.state, checkpoint.version),
                    None => (self.schema.initial_state(), 0),
                };
                let input = input.unwrap_or_default();
                let mut run = Run {
                    execution_id: Uuid::new_v4().to_string(),
                    session_id: Some(session_id.to_string()),
                    durable: true,
                    state: merge(&base, &input, &self.schema)?,
                    next: Some(self.entry.clone()),
                    iteration: 0,
                    version,
                    status: RunStatus::Running,
                    cancel: CancelToken::new(),
                    deadline: None,
                    events: Emitter::default(),
                };
                self.persist(&mut run, CheckpointSource::Input, None).await?;
                run
            }
        };

        let Some(step_name) = run.next.clone() else {
            return Ok(StepOutcome {
                executed: None,
                state: run.state,
                next_step: None,
                status: run.status,
                version: run.version,
            });
        };

        if let Err(err) = self.advance(&mut run, &step_name).await {
            self.record_failure(&mut run, &err).await;
            return Err(err);
        }
        Ok(StepOutcome {
            executed: Some(step_name),
            state: run.state,
            next_step: run.next,
            status: run.status,
            version: run.version,
        })
    }

    async fn update_state(&self, session_id: &str, patch: PartialState) -> GraphResult<Checkpoint> {
        let store = self.store()?;
        let _lease = self.leases.acquire(session_id)?;
        let latest = store.load(session_id).await?;
        let state = merge(&latest.state, &patch, &self.schema)?;

        let mut checkpoint = latest.successor(
            state,
            latest.next_step.clone(),
            latest.status,
            CheckpointSource::Update,
        );
        checkpoint.interrupt = latest.interrupt;
        store.save(checkpoint.clone()).await?;
        info!(
            graph = %self.id,
            session = session_id,
            version = checkpoint.version,
            "State updated"
        );
        Ok(checkpoint)
    }

    async fn rollback(&self, session_id: &str, version: u64) -> GraphResult<Checkpoint> {
        let store = self.store()?;
        let _lease = self.leases.acquire(session_id)?;
        let target = store.load_version(session_id, version).await?;
        let latest = store.load(session_id).await?;

        let checkpoint = Checkpoint {
            version: latest.version + 1,
            source: CheckpointSource::Rollback,
            created_at: chrono::Utc::now(),
            ..target
        };
        store.save(checkpoint.clone()).await?;
        info!(
            graph = %self.id,
            session = session_id,
            from = version,
            version = checkpoint.version,
            "Rolled back session"
        );
        Ok(checkpoint)
    }

    /// Run the loop under the whole-run deadline and record aborts.
    ///
    /// The deadline is enforced between steps and around step calls only,
    /// so a checkpoint write is never cut short.
    async fn drive(&self, run: &mut Run) -> GraphResult<RunOutcome> {
        run.deadline = self.config.run_timeout().map(|limit| Instant::now() + limit);
        let result = self.run_loop(run).await;
        if let Err(err) = &result {
            self.record_failure(run, err).await;
        }
        result
    }

    async fn run_loop(&self, run: &mut Run) -> GraphResult<RunOutcome> {
        while let Some(step_name) = run.next.clone() {
            if let Some(outcome) = self.advance(run, &step_name).await? {
                return Ok(outcome);
            }
        }
        Ok(self.complete(run).await)
    }

    /// One iteration: run `step_name`, merge, route, persist.
    ///
    /// Returns `Some` once the run has completed or paused.
    async fn advance(&self, run: &mut Run, step_name: &str) -> GraphResult<Option<RunOutcome>> {
        let site = run.site(step_name);
        if run.cancel.is_cancelled() {
            return Err(GraphError::Cancelled { site });
        }
        if run.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(GraphError::Timeout {
                duration_ms: self.config.run_timeout_ms,
                site: Some(site),
            });
        }
        if run.iteration >= self.config.max_steps {
            return Err(GraphError::IterationLimitExceeded {
                limit: self.config.max_steps,
                site,
            });
        }
        let step = self.steps.resolve(step_name)?;

        debug!(
            graph = %self.id,
            step = step_name,
            iteration = run.iteration,
            "Executing step"
        );
        run.emit(StreamEvent::StepStart {
            step: step_name.to_string(),
            iteration: run.iteration,
        })
        .await;

        let ctx = StepContext {
            graph_id: self.id.clone(),
            execution_id: run.execution_id.clone(),
            session_id: run.session_id.clone(),
            step: step_name.to_string(),
            iteration: run.iteration,
        };
        let update = self
            .call_step(step.as_ref(), &run.state, &ctx, &site, run.deadline)
            .await?;
        let merged = merge(&run.state, &update, &self.schema).map_err(|e| e.at(site.clone()))?;
        let transition = self
            .table
            .resolve(step_name, &merged)
            .map_err(|e| e.at(site.clone()))?;
        debug!("Step '{}' completed, next: {:?}", step_name, transition);

        run.state = merged;
        run.iteration += 1;
        run.next = transition.step().map(str::to_string);
        run.emit(StreamEvent::StepEnd {
            step: step_name.to_string(),
            iteration: run.iteration,
            update,
            state: run.state.clone(),
        })
        .await;

        let pause = match &run.next {
            Some(_) if !run.durable => None,
            Some(_) if self.config.pauses_after(step_name) => Some(InterruptKind::After),
            Some(next) if self.config.pauses_before(next) => Some(InterruptKind::Before),
            _ => None,
        };
        if run.durable {
            self.persist(run, CheckpointSource::Loop, pause).await?;
        }

        match (run.next.clone(), pause) {
            (None, _) => Ok(Some(self.complete(run).await)),
            (Some(_), Some(InterruptKind::After)) => {
                Ok(Some(self.interrupt(run, InterruptKind::After, step_name).await))
            }
            (Some(next), Some(InterruptKind::Before)) => {
                Ok(Some(self.interrupt(run, InterruptKind::Before, &next).await))
            }
            (Some(_), None) => Ok(None),
        }
    }

    async fn call_step(
        &self,
        step: &dyn Step,
        state: &State,
        ctx: &StepContext,
        site: &ErrorSite,
        deadline: Option<Instant>,
    ) -> GraphResult<PartialState> {
        // The tighter of the step timeout and what is left of the run budget
        let step_budget = self
            .config
            .step_timeout()
            .map(|limit| (limit, self.config.step_timeout_ms));
        let run_budget = deadline.map(|deadline| {
            (
                deadline.saturating_duration_since(Instant::now()),
                self.config.run_timeout_ms,
            )
        });
        let budget = match (step_budget, run_budget) {
            (Some(step), Some(run)) if run.0 < step.0 => Some(run),
            (Some(step), _) => Some(step),
            (None, run) => run,
        };

        let result = match budget {
            Some((limit, duration_ms)) => tokio::time::timeout(limit, step.run(state, ctx))
                .await
                .map_err(|_| GraphError::Timeout {
                    duration_ms,
                    site: Some(site.clone()),
                })?,
            None => step.run(state, ctx).await,
        };
        result.map_err(|source| GraphError::StepFailed {
            site: site.clone(),
            source,
        })
    }

    /// Write the run's committed state as the next version
    async fn persist(
        &self,
        run: &mut Run,
        source: CheckpointSource,
        pause: Option<InterruptKind>,
    ) -> GraphResult<()> {
        let store = self.store()?;
        let session_id = run.session_id.clone().ok_or_else(|| {
            GraphError::SessionRequired("checkpointing needs a session id".to_string())
        })?;
        let status = match (&run.next, pause) {
            (None, _) => RunStatus::Completed,
            (Some(_), Some(_)) => RunStatus::Interrupted,
            (Some(_), None) => RunStatus::Running,
        };

        let mut checkpoint = Checkpoint::new(
            session_id.clone(),
            run.version + 1,
            run.state.clone(),
            run.next.clone(),
            status,
            source,
        )
        .with_iteration(run.iteration);
        checkpoint.interrupt = pause;
        store.save(checkpoint).await?;
        run.version += 1;
        run.status = status;

        debug!(
            session = %session_id,
            version = run.version,
            status = %status,
            "Checkpoint persisted"
        );
        run.emit(StreamEvent::CheckpointSaved {
            session_id,
            version: run.version,
            status,
        })
        .await;
        Ok(())
    }

    /// Persist a failure marker: same state, same pending step
    async fn record_failure(&self, run: &mut Run, err: &GraphError) {
        warn!(graph = %self.id, error = %err, "Graph execution failed");
        if !run.durable || err.class() != ErrorClass::Runtime {
            return;
        }
        let (Ok(store), Some(session_id)) = (self.store(), run.session_id.clone()) else {
            return;
        };
        let checkpoint = Checkpoint::new(
            session_id,
            run.version + 1,
            run.state.clone(),
            run.next.clone(),
            RunStatus::Failed,
            CheckpointSource::Loop,
        )
        .with_iteration(run.iteration);
        match store.save(checkpoint).await {
            Ok(()) => {
                run.version += 1;
                run.status = RunStatus::Failed;
            }
            Err(save_err) => {
                warn!(error = %save_err, "Could not record failure checkpoint");
            }
        }
    }

    async fn complete(&self, run: &mut Run) -> RunOutcome {
        info!(
            "Graph '{}' execution completed after {} steps",
            self.id, run.iteration
        );
        run.emit(StreamEvent::Completed {
            state: run.state.clone(),
        })
        .await;
        RunOutcome::Completed(run.state.clone())
    }

    async fn interrupt(&self, run: &mut Run, kind: InterruptKind, step: &str) -> RunOutcome {
        let handle = InterruptHandle {
            session_id: run.session_id.clone().unwrap_or_default(),
            version: run.version,
            kind,
            step: step.to_string(),
            next_step: run.next.clone(),
            state: run.state.clone(),
        };
        info!(
            graph = %self.id,
            session = %handle.session_id,
            step = step,
            kind = ?kind,
            "Graph execution interrupted"
        );
        run.emit(StreamEvent::Interrupted(handle.clone())).await;
        RunOutcome::Interrupted(handle)
    }
}
