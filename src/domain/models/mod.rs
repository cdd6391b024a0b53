//! Domain models.
//!
//! Pure domain entities with business logic and validation rules. These
//! models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod background_task;
pub mod config;
pub mod dag;
pub mod queue;
pub mod task;
pub mod workflow;

pub use agent::{Agent, AgentMetrics, AgentStatus};
pub use background_task::{BackgroundTask, BackgroundTaskKind, BackgroundTaskOptions};
pub use config::{ResourceLimits, RuntimeConfig};
pub use dag::{DependencyNode, NodeStatus};
pub use queue::TaskQueue;
pub use task::{
    CapabilitySet, StatusHistoryEntry, Task, TaskAttempt, TaskConstraints, TaskPriority,
    TaskRequirements, TaskResult, TaskStatus,
};
pub use workflow::{
    Condition, RetryPolicy, Workflow, WorkflowCheckpoint, WorkflowExecution, WorkflowProgress,
    WorkflowStatus, WorkflowStrategy, WorkflowTask, WorkflowTaskKind,
};
