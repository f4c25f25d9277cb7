//! Error types for graph construction, execution and persistence.
//!
//! [`GraphError`] is the single taxonomy returned by every engine operation.
//! [`GraphError::class`] tells supervising code whether a failure is a
//! build-time misconfiguration, a run-time data/logic failure, a
//! concurrency-control violation, or an infrastructure problem, so it can
//! decide to escalate, retry the whole run, or resume from the last good
//! checkpoint.
//!
//! [`KernelError`] composes `GraphError` with configuration, IO and
//! serialization errors and is used together with
//! [`error_stack::Report`] where context needs to be attached.

use std::fmt;
use thiserror::Error;

/// Result type for engine operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Where in a run an error happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSite {
    /// Session the run belongs to, if durable
    pub session_id: Option<String>,
    /// Step being executed or resolved
    pub step: String,
    /// Number of step invocations completed before the failure
    pub iteration: u32,
}

impl ErrorSite {
    pub fn new(session_id: Option<&str>, step: impl Into<String>, iteration: u32) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            step: step.into(),
            iteration,
        }
    }
}

impl fmt::Display for ErrorSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step '{}' (iteration {}", self.step, self.iteration)?;
        if let Some(session) = &self.session_id {
            write!(f, ", session '{}'", session)?;
        }
        write!(f, ")")
    }
}

fn site_suffix(site: &Option<ErrorSite>) -> String {
    match site {
        Some(site) => format!(" at {}", site),
        None => String::new(),
    }
}

/// Coarse classification of a [`GraphError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The graph was assembled incorrectly
    Build,
    /// A step, router or merge failed while running
    Runtime,
    /// Optimistic versioning or session exclusivity was violated
    Concurrency,
    /// The checkpoint store or serialization layer failed
    Infrastructure,
}

/// Opaque failure raised by a step body.
///
/// Steps map any failure of their collaborators (LLM providers, tool
/// APIs, ...) into this type. The executor never retries it.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StepError(#[from] anyhow::Error);

impl StepError {
    /// Create a step error from a message
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(anyhow::Error::msg(message))
    }

    /// The underlying cause
    pub fn cause(&self) -> &anyhow::Error {
        &self.0
    }
}

/// Engine error taxonomy
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GraphError {
    /// A partial state broke the declared schema
    #[error("Schema violation on field '{field}': {reason}{}", site_suffix(.site))]
    SchemaViolation {
        field: String,
        reason: String,
        site: Option<ErrorSite>,
    },

    /// A step name was registered twice
    #[error("Step already registered: {0}")]
    DuplicateStep(String),

    /// A step name is not registered
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    /// The graph structure is invalid (edges, entry point, interrupts, schema)
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    /// A router returned a label absent from its label map
    #[error("Router of step '{from}' returned undeclared label '{label}' (expected one of {expected:?}){}", site_suffix(.site))]
    RoutingError {
        from: String,
        label: String,
        expected: Vec<String>,
        site: Option<ErrorSite>,
    },

    /// A step body failed
    #[error("Step failed at {site}: {source}")]
    StepFailed {
        site: ErrorSite,
        #[source]
        source: StepError,
    },

    /// The iteration budget was exhausted
    #[error("Iteration limit of {limit} exceeded at {site}")]
    IterationLimitExceeded { limit: u32, site: ErrorSite },

    /// A checkpoint was written against an outdated base version
    #[error("Stale version for session '{session_id}': expected {expected}, got {actual}")]
    StaleVersion {
        session_id: String,
        expected: u64,
        actual: u64,
    },

    /// Another run currently holds the session
    #[error("Session is busy: {0}")]
    SessionBusy(String),

    /// The operation needs a durable session (session id plus checkpointer)
    #[error("Session required: {0}")]
    SessionRequired(String),

    /// No checkpoint exists for the session (or version)
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// A step or the whole run exceeded its time budget
    #[error("Timed out after {duration_ms}ms{}", site_suffix(.site))]
    Timeout {
        duration_ms: u64,
        site: Option<ErrorSite>,
    },

    /// The caller cancelled the run between steps
    #[error("Run cancelled at {site}")]
    Cancelled { site: ErrorSite },

    /// The checkpoint store failed
    #[error("Checkpoint store error: {0}")]
    Store(String),

    /// State could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    /// Create a schema violation without run context
    pub fn schema_violation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
            site: None,
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateStep(_) | Self::UnknownStep(_) | Self::MalformedGraph(_) => {
                ErrorClass::Build
            }
            Self::StaleVersion { .. } | Self::SessionBusy(_) => ErrorClass::Concurrency,
            Self::Store(_) | Self::Serialization(_) => ErrorClass::Infrastructure,
            Self::SchemaViolation { .. }
            | Self::RoutingError { .. }
            | Self::StepFailed { .. }
            | Self::IterationLimitExceeded { .. }
            | Self::SessionRequired(_)
            | Self::CheckpointNotFound(_)
            | Self::Timeout { .. }
            | Self::Cancelled { .. } => ErrorClass::Runtime,
        }
    }

    /// Attach run context to variants that carry an optional site
    pub fn at(self, at: ErrorSite) -> Self {
        match self {
            Self::SchemaViolation {
                field,
                reason,
                site: None,
            } => Self::SchemaViolation {
                field,
                reason,
                site: Some(at),
            },
            Self::RoutingError {
                from,
                label,
                expected,
                site: None,
            } => Self::RoutingError {
                from,
                label,
                expected,
                site: Some(at),
            },
            Self::Timeout {
                duration_ms,
                site: None,
            } => Self::Timeout {
                duration_ms,
                site: Some(at),
            },
            other => other,
        }
    }

    /// Run context, when known
    pub fn site(&self) -> Option<&ErrorSite> {
        match self {
            Self::SchemaViolation { site, .. }
            | Self::RoutingError { site, .. }
            | Self::Timeout { site, .. } => site.as_ref(),
            Self::StepFailed { site, .. }
            | Self::IterationLimitExceeded { site, .. }
            | Self::Cancelled { site } => Some(site),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

/// Crate-level error type for `stepgraph-kernel`.
///
/// Use [`KernelResult`] to attach human-readable context as the error
/// propagates up the call stack.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// An error originating from the engine
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// A configuration-related error (requires the `config` feature)
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
