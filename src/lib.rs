//! Coordination runtime: dependency graph, circuit breaker, background
//! executor, load balancer, scheduler with work-stealing, hive orchestrator,
//! and workflow orchestrator, wired together over a shared event bus.

pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::error::{
    BalancerError, BreakerError, CoordinationError, ExecutorError, GraphError, HiveError,
    SchedulerError, TaskFailure, WorkflowError,
};
pub use domain::models::RuntimeConfig;
pub use infrastructure::config::ConfigLoader;
