//! Run results and stream events

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{PartialState, State};
use crate::checkpoint::{InterruptKind, RunStatus};
use crate::error::GraphError;

/// Information about a paused run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptHandle {
    pub session_id: String,
    /// Version of the checkpoint recording the pause
    pub version: u64,
    pub kind: InterruptKind,
    /// The step the pause is attached to
    pub step: String,
    /// Step that runs on resume
    pub next_step: Option<String>,
    /// State at the pause
    pub state: State,
}

/// Result of `invoke` / `resume`
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run reached the terminal marker
    Completed(State),
    /// The run paused at an interrupt point
    Interrupted(InterruptHandle),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted(_))
    }

    /// State at the end of the call, whether completed or paused
    pub fn state(&self) -> &State {
        match self {
            RunOutcome::Completed(state) => state,
            RunOutcome::Interrupted(handle) => &handle.state,
        }
    }

    pub fn into_state(self) -> State {
        match self {
            RunOutcome::Completed(state) => state,
            RunOutcome::Interrupted(handle) => handle.state,
        }
    }

    pub fn interrupt(&self) -> Option<&InterruptHandle> {
        match self {
            RunOutcome::Interrupted(handle) => Some(handle),
            RunOutcome::Completed(_) => None,
        }
    }
}

/// Result of executing a single step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Step that ran, `None` when the session had already completed
    pub executed: Option<String>,
    pub state: State,
    /// Pending step, `None` at the end
    pub next_step: Option<String>,
    pub status: RunStatus,
    /// Version persisted for this step
    pub version: u64,
}

impl StepOutcome {
    pub fn is_finished(&self) -> bool {
        self.next_step.is_none()
    }
}

/// Event emitted while streaming a run
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The run started (or resumed) at `entry`
    RunStart {
        execution_id: String,
        session_id: Option<String>,
        entry: String,
    },
    /// A step is about to run
    StepStart { step: String, iteration: u32 },
    /// A step finished and its output was merged
    StepEnd {
        step: String,
        iteration: u32,
        update: PartialState,
        state: State,
    },
    /// A checkpoint was persisted
    CheckpointSaved {
        session_id: String,
        version: u64,
        status: RunStatus,
    },
    /// The run paused
    Interrupted(InterruptHandle),
    /// The run completed
    Completed { state: State },
    /// The run aborted
    Error {
        step: Option<String>,
        error: Arc<GraphError>,
    },
}

impl StreamEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Interrupted(_) | StreamEvent::Completed { .. } | StreamEvent::Error { .. }
        )
    }
}
