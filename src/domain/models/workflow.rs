//! Workflow domain model.
//!
//! A workflow is a user-defined composite plan executed by
//! `services::workflow_orchestrator` on top of the hive orchestrator, the
//! load balancer, and the background executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::task::TaskPriority;

/// Strategy a workflow execution drives its tasks under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStrategy {
    Sequential,
    Parallel,
    Pipeline,
    ForkJoin,
    Conditional,
    Loop,
    Consensus,
    MapReduce,
    EventDriven,
}

/// The kind of work a single workflow task represents, determining which
/// execution path the orchestrator takes for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTaskKind {
    Atomic,
    Composite,
    Conditional,
    Loop,
    Fork,
    Join,
}

/// A guard evaluated against workflow variables to gate a conditional task
/// or a loop's continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    pub equals: serde_json::Value,
}

impl Condition {
    pub fn evaluate(&self, variables: &HashMap<String, serde_json::Value>) -> bool {
        variables.get(&self.variable).map(|v| v == &self.equals).unwrap_or(false)
    }
}

/// A single task definition inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: Uuid,
    pub name: String,
    pub kind: WorkflowTaskKind,
    /// Non-empty for atomic/composite tasks; validated at submission time.
    pub task_definition: Option<serde_json::Value>,
    pub depends_on: HashSet<Uuid>,
    pub conditions: Vec<Condition>,
    pub max_iterations: u32,
    pub priority: TaskPriority,
    /// For fork/join: which branch this task belongs to.
    pub branch: Option<String>,
    /// For event-driven: the topic this task is attached to.
    pub event_trigger: Option<String>,
}

impl WorkflowTask {
    pub fn atomic(name: impl Into<String>, task_definition: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: WorkflowTaskKind::Atomic,
            task_definition: Some(task_definition),
            depends_on: HashSet::new(),
            conditions: Vec::new(),
            max_iterations: 1,
            priority: TaskPriority::default(),
            branch: None,
            event_trigger: None,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = Uuid>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }
}

/// A retry policy applied to individual workflow tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1, backoff_base_ms: 500 }
    }
}

/// A user-defined composite plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub strategy: WorkflowStrategy,
    pub tasks: Vec<WorkflowTask>,
    pub variables: HashMap<String, serde_json::Value>,
    pub retry_policy: RetryPolicy,
    pub timeout_ms: Option<u64>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, strategy: WorkflowStrategy) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            strategy,
            tasks: Vec::new(),
            variables: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
        }
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = WorkflowTask>) -> Self {
        self.tasks.extend(tasks);
        self
    }
}

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// A snapshot of a running execution's state, persisted as a checkpoint
/// when checkpointing is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub execution_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub completed_tasks: HashSet<Uuid>,
    pub failed_tasks: HashSet<Uuid>,
    pub running_tasks: HashSet<Uuid>,
    pub variables: HashMap<String, serde_json::Value>,
}

/// Live state for one in-flight workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow: Workflow,
    pub status: WorkflowStatus,
    pub completed_tasks: HashSet<Uuid>,
    pub failed_tasks: HashSet<Uuid>,
    pub running_tasks: HashSet<Uuid>,
    pub skipped_tasks: HashSet<Uuid>,
    pub variables: HashMap<String, serde_json::Value>,
    pub checkpoints: Vec<WorkflowCheckpoint>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(workflow: Workflow) -> Self {
        let variables = workflow.variables.clone();
        Self {
            id: Uuid::new_v4(),
            workflow,
            status: WorkflowStatus::Running,
            completed_tasks: HashSet::new(),
            failed_tasks: HashSet::new(),
            running_tasks: HashSet::new(),
            skipped_tasks: HashSet::new(),
            variables,
            checkpoints: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// `{totalTasks, completedTasks, failedTasks, runningTasks, pendingTasks, percentage, estimatedTimeRemaining}`
    pub fn progress(&self) -> WorkflowProgress {
        let total = self.workflow.tasks.len();
        let completed = self.completed_tasks.len();
        let failed = self.failed_tasks.len();
        let running = self.running_tasks.len();
        let pending = total.saturating_sub(completed + failed + running);
        let percentage = if total == 0 { 100.0 } else { (completed + failed) as f64 / total as f64 * 100.0 };
        let elapsed = (Utc::now() - self.started_at).num_milliseconds().max(0) as f64;
        let estimated_remaining_ms = if completed == 0 || total == 0 {
            None
        } else {
            let per_task = elapsed / completed as f64;
            Some((per_task * pending as f64).max(0.0))
        };
        WorkflowProgress {
            total_tasks: total,
            completed_tasks: completed,
            failed_tasks: failed,
            running_tasks: running,
            pending_tasks: pending,
            percentage,
            estimated_time_remaining_ms: estimated_remaining_ms,
        }
    }

    pub fn checkpoint(&mut self) -> WorkflowCheckpoint {
        let checkpoint = WorkflowCheckpoint {
            execution_id: self.id,
            taken_at: Utc::now(),
            completed_tasks: self.completed_tasks.clone(),
            failed_tasks: self.failed_tasks.clone(),
            running_tasks: self.running_tasks.clone(),
            variables: self.variables.clone(),
        };
        self.checkpoints.push(checkpoint.clone());
        checkpoint
    }

    /// Restore state from the latest checkpoint, re-queueing tasks that
    /// were recorded as `running` at checkpoint time.
    pub fn recover_from_latest_checkpoint(&mut self) -> HashSet<Uuid> {
        let Some(checkpoint) = self.checkpoints.last().cloned() else {
            return HashSet::new();
        };
        self.completed_tasks = checkpoint.completed_tasks;
        self.failed_tasks = checkpoint.failed_tasks;
        let to_requeue = checkpoint.running_tasks.clone();
        self.running_tasks = HashSet::new();
        self.variables = checkpoint.variables;
        to_requeue
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub percentage: f64,
    pub estimated_time_remaining_ms: Option<f64>,
}
