//! Checkpoints and the Checkpoint Store contract
//!
//! A [`Checkpoint`] is an immutable snapshot of one session's state at one
//! version, plus the step that would run next. Stores keep an append-only,
//! strictly increasing version history per session and reject writes
//! against a stale base version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphResult;
use crate::workflow::State;

/// Lifecycle status of a session's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    /// Whether a run in this status can be re-entered with `resume`
    pub fn is_resumable(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Interrupted | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What produced a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Input of a new run
    Input,
    /// A step completed inside the run loop
    Loop,
    /// An external `update_state` call
    Update,
    /// A historical version copied forward
    Rollback,
}

/// Which side of a step an interrupt paused on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Before,
    After,
}

/// Versioned state snapshot of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    /// Strictly increasing per session, starting at 1
    pub version: u64,
    pub state: State,
    /// Step that runs next on resume; `None` once the run has ended
    pub next_step: Option<String>,
    pub status: RunStatus,
    pub source: CheckpointSource,
    /// Step invocations completed in the logical run
    pub iteration: u32,
    /// Set when the checkpoint records a pause
    pub interrupt: Option<InterruptKind>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        session_id: impl Into<String>,
        version: u64,
        state: State,
        next_step: Option<String>,
        status: RunStatus,
        source: CheckpointSource,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            version,
            state,
            next_step,
            status,
            source,
            iteration: 0,
            interrupt: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_interrupt(mut self, kind: InterruptKind) -> Self {
        self.interrupt = Some(kind);
        self
    }

    /// Derive the successor checkpoint: same session, version + 1
    pub fn successor(
        &self,
        state: State,
        next_step: Option<String>,
        status: RunStatus,
        source: CheckpointSource,
    ) -> Self {
        Checkpoint::new(
            self.session_id.clone(),
            self.version + 1,
            state,
            next_step,
            status,
            source,
        )
        .with_iteration(self.iteration)
    }
}

/// Durable, append-only checkpoint persistence
///
/// Implementations must keep sessions fully isolated and must make `save`
/// atomic per session: a checkpoint is accepted only when its version is
/// exactly one past the latest stored version (1 for a new session).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint; `StaleVersion` if its base version is outdated
    async fn save(&self, checkpoint: Checkpoint) -> GraphResult<()>;

    /// Latest checkpoint of the session; `CheckpointNotFound` if none
    async fn load(&self, session_id: &str) -> GraphResult<Checkpoint>;

    /// A specific version; `CheckpointNotFound` if absent
    async fn load_version(&self, session_id: &str, version: u64) -> GraphResult<Checkpoint>;

    /// All checkpoints of a session, newest first
    async fn history(&self, session_id: &str) -> GraphResult<Vec<Checkpoint>>;

    /// Drop all checkpoints of a session; returns whether any existed
    async fn delete(&self, session_id: &str) -> GraphResult<bool>;

    /// Known session ids
    async fn sessions(&self) -> GraphResult<Vec<String>>;

    /// Latest checkpoint, or `None` for an unknown session
    async fn latest(&self, session_id: &str) -> GraphResult<Option<Checkpoint>> {
        match self.load(session_id).await {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(crate::error::GraphError::CheckpointNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
