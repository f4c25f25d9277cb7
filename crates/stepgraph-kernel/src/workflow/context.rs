//! Graph and Run Configuration
//!
//! [`GraphConfig`] is fixed when a graph is compiled (iteration budget,
//! timeouts, interrupt points). [`RunConfig`] travels with a single
//! `invoke`/`stream`/`step` call (session id, cancellation).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::CancelToken;

/// Default iteration budget per logical run
pub const DEFAULT_MAX_STEPS: u32 = 25;

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

/// Graph execution configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum number of step invocations per logical run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Per-step timeout in milliseconds (0 = no timeout)
    pub step_timeout_ms: u64,

    /// Whole-run timeout in milliseconds (0 = no timeout)
    pub run_timeout_ms: u64,

    /// Pause before these steps run
    pub interrupt_before: Vec<String>,

    /// Pause after these steps have been merged
    pub interrupt_after: Vec<String>,

    /// Enable debug mode
    pub debug: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            step_timeout_ms: 0,
            run_timeout_ms: 0,
            interrupt_before: Vec::new(),
            interrupt_after: Vec::new(),
            debug: false,
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the iteration budget
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the per-step timeout
    pub fn with_step_timeout(mut self, timeout_ms: u64) -> Self {
        self.step_timeout_ms = timeout_ms;
        self
    }

    /// Set the whole-run timeout
    pub fn with_run_timeout(mut self, timeout_ms: u64) -> Self {
        self.run_timeout_ms = timeout_ms;
        self
    }

    /// Pause before `step` runs
    pub fn interrupt_before(mut self, step: impl Into<String>) -> Self {
        self.interrupt_before.push(step.into());
        self
    }

    /// Pause after `step` has run and been merged
    pub fn interrupt_after(mut self, step: impl Into<String>) -> Self {
        self.interrupt_after.push(step.into());
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_ms > 0).then(|| Duration::from_millis(self.step_timeout_ms))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_ms > 0).then(|| Duration::from_millis(self.run_timeout_ms))
    }

    pub fn has_interrupts(&self) -> bool {
        !self.interrupt_before.is_empty() || !self.interrupt_after.is_empty()
    }

    pub fn pauses_before(&self, step: &str) -> bool {
        self.interrupt_before.iter().any(|s| s == step)
    }

    pub fn pauses_after(&self, step: &str) -> bool {
        self.interrupt_after.iter().any(|s| s == step)
    }
}

/// Per-call run configuration
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Session to persist into; `None` runs ephemerally
    pub session_id: Option<String>,

    /// Cooperative cancellation, checked between steps
    pub cancel: CancelToken,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run against a durable session
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
