//! Domain error types for the coordination runtime.
//!
//! Each component owns a `thiserror` enum for the error kinds it can raise;
//! `CoordinationError` unifies them at the crate boundary so callers that
//! cross component lines (the hive and workflow orchestrators, mainly) can
//! propagate with a single `?`.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the dependency graph (`services::dependency_graph`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("task {0} already present in the dependency graph")]
    AlreadyExists(Uuid),

    #[error("task {0} references unknown dependency {1}")]
    UnknownDependency(Uuid, Uuid),

    #[error("adding task {0} would create a circular dependency: {1:?}")]
    CircularDependency(Uuid, Vec<Uuid>),

    #[error("dependency graph contains a cycle: {0:?}")]
    CycleDetected(Vec<Uuid>),
}

/// Errors raised by the circuit breaker (`services::circuit_breaker`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BreakerError {
    #[error("circuit breaker '{name}' is open, retry after {retry_after_ms}ms")]
    BreakerOpen { name: String, retry_after_ms: i64 },

    #[error("circuit breaker '{0}' rejected call: half-open trial slot unavailable")]
    HalfOpenExhausted(String),
}

/// Errors raised by the background executor (`services::background_executor`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("background task queue is full ({0} tasks queued)")]
    QueueFull(usize),

    #[error("command '{0}' is not in the allow-list")]
    CommandNotAllowed(String),

    #[error("argument '{0}' rejected by the unsafe-argument scanner: {1}")]
    UnsafeArgument(String, String),

    #[error("model name '{0}' is not a valid identifier")]
    InvalidModelName(String),

    #[error("maxTokens must be a positive integer, got {0}")]
    InvalidMaxTokens(i64),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("process exited with non-zero status {0}")]
    NonZeroExit(i32),

    #[error("process was killed by signal {0}")]
    KilledBySignal(String),

    #[error("task {0} timed out after {1}ms")]
    Timeout(Uuid, u64),

    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("task {0} cannot be retried: {1}")]
    MaxRetriesExceeded(Uuid, u32),

    #[error("persistence I/O error: {0}")]
    PersistenceFailed(String),
}

impl ExecutorError {
    /// Structural/configuration errors fail fast; no retry is attempted.
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::CommandNotAllowed(_)
                | Self::UnsafeArgument(_, _)
                | Self::InvalidModelName(_)
                | Self::InvalidMaxTokens(_)
                | Self::QueueFull(_)
                | Self::MaxRetriesExceeded(_, _)
        )
    }

    /// Recoverable failures are retried locally under the task's policy.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_) | Self::NonZeroExit(_) | Self::KilledBySignal(_) | Self::Timeout(_, _)
        )
    }
}

/// Errors raised by the scheduler (`services::scheduler`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no admissible agent available for task {0}")]
    NoAdmissibleAgent(Uuid),

    #[error("agent {0} is not registered")]
    UnknownAgent(Uuid),

    #[error("task {0} is not assigned")]
    NotAssigned(Uuid),
}

/// Errors raised by the load balancer (`services::load_balancer`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalancerError {
    #[error("no admissible agent passed the balancer's filters")]
    NoAdmissibleAgent,
}

/// Errors raised by the hive orchestrator (`services::hive_orchestrator`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HiveError {
    #[error("decomposition {0} rejected: consensus not reached ({1} approve / {2} reject)")]
    ConsensusRejected(Uuid, usize, usize),

    #[error("decomposition {0} timed out waiting for consensus quorum")]
    ConsensusTimeout(Uuid),

    #[error("decomposition depth {0} exceeds maxDecompositionDepth {1}")]
    MaxDepthExceeded(u32, u32),

    #[error("subtask {0} has no admissible agent")]
    NoAdmissibleAgent(Uuid),

    #[error("decomposition wiring for subtask {0} would create a circular dependency")]
    CyclicDecomposition(Uuid),
}

/// Errors raised by the workflow orchestrator (`services::workflow_orchestrator`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("workflow engine at capacity: {0} concurrent executions already running")]
    CapacityExceeded(usize),

    #[error("workflow task {0} has no task definition")]
    MissingTaskDefinition(Uuid),

    #[error("workflow dependency graph contains a cycle")]
    CyclicDependencies,

    #[error("workflow execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("loop task {0} exceeded maxIterations {1}")]
    MaxIterationsExceeded(Uuid, u32),
}

/// Crate-wide error type unifying every component's error kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Breaker(#[from] BreakerError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error(transparent)]
    Hive(#[from] HiveError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Structured, user-visible record of a terminal failure, attached to a
/// task's `error` field and emitted with the corresponding `task:failed`
/// event exactly once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TaskFailure {
    /// Short machine-readable error kind, e.g. "Timeout", "NonZeroExit".
    pub kind: String,
    pub message: String,
    pub context: std::collections::BTreeMap<String, String>,
}

impl TaskFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            context: std::collections::BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl From<&ExecutorError> for TaskFailure {
    fn from(err: &ExecutorError) -> Self {
        let kind = match err {
            ExecutorError::Timeout(_, _) => "Timeout",
            ExecutorError::NonZeroExit(_) => "NonZeroExit",
            ExecutorError::KilledBySignal(_) => "KilledBySignal",
            ExecutorError::SpawnFailed(_) => "SpawnFailed",
            ExecutorError::CommandNotAllowed(_) => "CommandNotAllowed",
            ExecutorError::UnsafeArgument(_, _) => "UnsafeArgument",
            _ => "ExecutorError",
        };
        TaskFailure::new(kind, err.to_string())
    }
}
