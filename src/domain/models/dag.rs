//! Dependency graph node model shared by `services::dependency_graph`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Readiness state of a node tracked by the dependency graph.
///
/// Distinct from `TaskStatus`: this is the graph's own view of whether a
/// task's dependencies are satisfied, independent of whether the task has
/// actually been picked up for execution yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Dependencies not all completed yet.
    Pending,
    /// All dependencies completed; eligible for scheduling.
    Ready,
    /// A dependency failed; this node is unreachable.
    Failed,
}

/// A node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNode {
    pub task_id: Uuid,
    pub dependencies: HashSet<Uuid>,
    pub dependents: HashSet<Uuid>,
    pub status: NodeStatus,
}

impl DependencyNode {
    pub fn new(task_id: Uuid, dependencies: HashSet<Uuid>) -> Self {
        let status = if dependencies.is_empty() { NodeStatus::Ready } else { NodeStatus::Pending };
        Self { task_id, dependencies, dependents: HashSet::new(), status }
    }
}
