//! Domain layer for the coordination runtime.
//!
//! Contains core business entities and validation rules, framework-agnostic
//! and free of I/O.

pub mod error;
pub mod models;

pub use error::{
    BalancerError, BreakerError, CoordinationError, ExecutorError, GraphError, HiveError,
    SchedulerError, TaskFailure, WorkflowError,
};
