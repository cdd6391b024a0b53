//! Dependency graph: DAG of pending tasks, readiness queries, topological
//! order, and critical path.
//!
//! Grounded on the DFS cycle detection and Kahn's-algorithm topological
//! sort shape used elsewhere in this codebase's task-dependency handling,
//! generalized into a standalone mutable graph that owns its own add/
//! remove/complete/fail lifecycle instead of being recomputed from a task
//! list on every call.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::error::GraphError;
use crate::domain::models::{DependencyNode, NodeStatus};

/// The longest path through the graph by edge count (edge weight 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalPath {
    pub from: Uuid,
    pub to: Uuid,
    pub path: Vec<Uuid>,
    pub weight: u32,
}

/// A mutable DAG of pending/ready/failed task nodes.
///
/// Invariants: the dependency relation is acyclic; `dependents(x)` is
/// always the inverse of `dependencies(x)`; mutations either succeed fully
/// or leave the graph unchanged.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<Uuid, DependencyNode>,
    completed: HashSet<Uuid>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self { nodes: HashMap::new(), completed: HashSet::new() }
    }

    /// Add a task with its declared dependencies.
    ///
    /// Every dependency must already be a known node or already completed.
    /// Adding the node must not introduce a cycle; on failure the graph is
    /// rolled back to its pre-call state.
    #[instrument(skip(self, dependencies), fields(task_id = %task_id))]
    pub fn add_task(&mut self, task_id: Uuid, dependencies: HashSet<Uuid>) -> Result<(), GraphError> {
        if self.nodes.contains_key(&task_id) {
            return Err(GraphError::AlreadyExists(task_id));
        }

        for dep in &dependencies {
            if !self.nodes.contains_key(dep) && !self.completed.contains(dep) {
                return Err(GraphError::UnknownDependency(task_id, *dep));
            }
        }

        let node = DependencyNode::new(task_id, dependencies.clone());
        self.nodes.insert(task_id, node);
        for dep in &dependencies {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.insert(task_id);
            }
        }

        if let Some(cycle) = self.detect_cycle() {
            // Roll back: unwire the back-references we just added, then drop the node.
            for dep in &dependencies {
                if let Some(dep_node) = self.nodes.get_mut(dep) {
                    dep_node.dependents.remove(&task_id);
                }
            }
            self.nodes.remove(&task_id);
            return Err(GraphError::CircularDependency(task_id, cycle));
        }

        self.recompute_readiness();
        Ok(())
    }

    /// Remove a node, disconnecting it from both sides. Dependents whose
    /// remaining dependencies are all completed transition to `Ready`.
    pub fn remove_task(&mut self, task_id: Uuid) {
        let Some(node) = self.nodes.remove(&task_id) else { return };
        for dep in &node.dependencies {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.remove(&task_id);
            }
        }
        for dependent in &node.dependents {
            if let Some(dependent_node) = self.nodes.get_mut(dependent) {
                dependent_node.dependencies.remove(&task_id);
            }
        }
        self.recompute_readiness();
    }

    /// Mark a task completed. Returns the set of dependents that became
    /// ready as a direct consequence. Idempotent (warns) on an unknown or
    /// already-completed task.
    pub fn mark_completed(&mut self, task_id: Uuid) -> HashSet<Uuid> {
        if self.completed.contains(&task_id) {
            warn!(%task_id, "mark_completed called on already-completed task");
            return HashSet::new();
        }
        let Some(node) = self.nodes.get(&task_id).cloned() else {
            warn!(%task_id, "mark_completed called on unknown task");
            return HashSet::new();
        };

        self.completed.insert(task_id);
        self.remove_task(task_id);

        let mut became_ready = HashSet::new();
        for dependent in &node.dependents {
            if let Some(dependent_node) = self.nodes.get(dependent) {
                if dependent_node.status == NodeStatus::Ready {
                    became_ready.insert(*dependent);
                }
            }
        }
        became_ready
    }

    /// Mark a task failed. Returns the transitive closure of dependents,
    /// all marked `Failed`. The original task is removed from the graph.
    pub fn mark_failed(&mut self, task_id: Uuid) -> HashSet<Uuid> {
        let mut closure = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = self.nodes.get(&task_id) {
            queue.extend(node.dependents.iter().copied());
        } else {
            warn!(%task_id, "mark_failed called on unknown task");
        }

        while let Some(dependent) = queue.pop_front() {
            if !closure.insert(dependent) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&dependent) {
                node.status = NodeStatus::Failed;
                queue.extend(node.dependents.iter().copied());
            }
        }

        self.remove_task(task_id);
        closure
    }

    /// True iff every declared dependency of `task_id` is in the completed set.
    pub fn is_task_ready(&self, task_id: Uuid) -> bool {
        match self.nodes.get(&task_id) {
            Some(node) => node.dependencies.iter().all(|d| self.completed.contains(d)),
            None => false,
        }
    }

    /// Snapshot of nodes that are ready or pending-but-ready, promoting the
    /// latter to `Ready` as a side effect.
    pub fn get_ready_tasks(&mut self) -> Vec<Uuid> {
        self.recompute_readiness();
        self.nodes
            .values()
            .filter(|n| n.status == NodeStatus::Ready)
            .map(|n| n.task_id)
            .collect()
    }

    fn recompute_readiness(&mut self) {
        let completed = &self.completed;
        for node in self.nodes.values_mut() {
            if node.status == NodeStatus::Failed {
                continue;
            }
            node.status = if node.dependencies.iter().all(|d| completed.contains(d)) {
                NodeStatus::Ready
            } else {
                NodeStatus::Pending
            };
        }
    }

    /// DFS cycle detection with a recursion stack; returns the cycle
    /// members (the path from the repeated node, inclusive) if found.
    pub fn detect_cycle(&self) -> Option<Vec<Uuid>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for &id in self.nodes.keys() {
            if !visited.contains(&id) {
                if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node_id: Uuid,
        visited: &mut HashSet<Uuid>,
        rec_stack: &mut HashSet<Uuid>,
        path: &mut Vec<Uuid>,
    ) -> Option<Vec<Uuid>> {
        visited.insert(node_id);
        rec_stack.insert(node_id);
        path.push(node_id);

        if let Some(node) = self.nodes.get(&node_id) {
            for &dep in &node.dependencies {
                if !visited.contains(&dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(&dep) {
                    let start = path.iter().position(|&id| id == dep).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
            }
        }

        rec_stack.remove(&node_id);
        path.pop();
        None
    }

    /// Stable topological order consistent with the DAG. Fails with
    /// `CycleDetected` if any cycle is present.
    #[instrument(skip(self))]
    pub fn topological_sort(&self) -> Result<Vec<Uuid>, GraphError> {
        if let Some(cycle) = self.detect_cycle() {
            return Err(GraphError::CycleDetected(cycle));
        }

        let mut in_degree: HashMap<Uuid, usize> =
            self.nodes.keys().map(|&id| (id, 0)).collect();
        for node in self.nodes.values() {
            for dependent in &node.dependents {
                *in_degree.entry(*dependent).or_insert(0) += 1;
            }
        }

        let mut ready: VecDeque<Uuid> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        // Stable order: sort the initial frontier by id so repeated runs agree.
        let mut ready_vec: Vec<Uuid> = ready.drain(..).collect();
        ready_vec.sort();
        ready.extend(ready_vec);

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                let mut newly_ready = Vec::new();
                for dependent in &node.dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(*dependent);
                        }
                    }
                }
                newly_ready.sort();
                ready.extend(newly_ready);
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::CycleDetected(Vec::new()));
        }
        Ok(order)
    }

    /// Longest path (edge weight 1) from any source to any sink.
    /// Returns `None` on an empty or cyclic graph.
    pub fn find_critical_path(&self) -> Option<CriticalPath> {
        let order = self.topological_sort().ok()?;
        if order.is_empty() {
            return None;
        }

        let mut best_dist: HashMap<Uuid, u32> = HashMap::new();
        let mut best_pred: HashMap<Uuid, Uuid> = HashMap::new();
        for &id in &order {
            best_dist.entry(id).or_insert(0);
        }

        // Process in reverse-topological (dependency-first) order so that a
        // node's distance is finalized before its dependents consume it.
        for &id in order.iter().rev() {
            let Some(node) = self.nodes.get(&id) else { continue };
            let dist_here = *best_dist.get(&id).unwrap_or(&0);
            for &dependent in &node.dependents {
                let candidate = dist_here + 1;
                let entry = best_dist.entry(dependent).or_insert(0);
                if candidate > *entry {
                    *entry = candidate;
                    best_pred.insert(dependent, id);
                }
            }
        }

        let (&to, &weight) = best_dist.iter().max_by_key(|(_, &w)| w)?;
        let mut path = vec![to];
        let mut cursor = to;
        while let Some(&pred) = best_pred.get(&cursor) {
            path.push(pred);
            cursor = pred;
        }
        path.reverse();
        let from = *path.first()?;

        Some(CriticalPath { from, to, path, weight })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
