//! Workflow orchestrator: executes a user-defined `Workflow` on top of the
//! Hive orchestrator, the Load Balancer, and the Background Executor.
//!
//! A DAG-validated plan is driven by a per-task-kind dispatch table, the
//! way `workflow_builder.rs`/`phase_orchestrator.rs` pair them; checkpointing
//! reuses `WorkflowExecution::checkpoint()` /
//! `recover_from_latest_checkpoint()` already defined on the domain model.

use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::WorkflowError;
use crate::domain::models::{
    BackgroundTaskKind, BackgroundTaskOptions, Task, Workflow, WorkflowExecution, WorkflowProgress,
    WorkflowStatus, WorkflowStrategy, WorkflowTask, WorkflowTaskKind,
};
use crate::services::background_executor::BackgroundExecutor;
use crate::services::event_bus::{wait_for_task_completion, EventBus, EventCategory, EventPayload, EventSeverity};
use crate::services::hive_orchestrator::{DecompositionStrategy, HiveOrchestrator};
use crate::services::load_balancer::{LoadBalancer, SystemSnapshot};

#[derive(Debug, Clone)]
pub struct WorkflowOrchestratorConfig {
    pub max_concurrent_workflows: usize,
    pub checkpoint_interval: Duration,
    pub enable_checkpointing: bool,
    pub task_timeout: Duration,
}

impl Default for WorkflowOrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 20,
            checkpoint_interval: Duration::from_secs(30),
            enable_checkpointing: true,
            task_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    Skipped,
}

pub struct WorkflowOrchestrator {
    config: WorkflowOrchestratorConfig,
    executions: RwLock<HashMap<Uuid, WorkflowExecution>>,
    backing_tasks: RwLock<HashMap<Uuid, Uuid>>,
    executor: Arc<BackgroundExecutor>,
    balancer: Arc<LoadBalancer>,
    hive: Arc<HiveOrchestrator>,
    event_bus: Arc<EventBus>,
}

impl WorkflowOrchestrator {
    pub fn new(
        config: WorkflowOrchestratorConfig,
        executor: Arc<BackgroundExecutor>,
        balancer: Arc<LoadBalancer>,
        hive: Arc<HiveOrchestrator>,
        event_bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            executions: RwLock::new(HashMap::new()),
            backing_tasks: RwLock::new(HashMap::new()),
            executor,
            balancer,
            hive,
            event_bus,
        })
    }

    /// Validate, admit under `maxConcurrentWorkflows`, and kick off a new
    /// execution in the background; returns immediately with its id.
    #[instrument(skip(self, workflow))]
    pub async fn execute_workflow(self: &Arc<Self>, workflow: Workflow) -> Result<Uuid, WorkflowError> {
        validate_workflow(&workflow)?;

        let running = self.executions.read().await.values().filter(|e| e.status == WorkflowStatus::Running).count();
        if running >= self.config.max_concurrent_workflows {
            return Err(WorkflowError::CapacityExceeded(running));
        }

        let execution = WorkflowExecution::new(workflow);
        let execution_id = execution.id;
        self.executions.write().await.insert(execution_id, execution);

        self.event_bus.publish(EventCategory::Workflow, EventSeverity::Info, EventPayload::WorkflowCreated { execution_id }).await;
        self.event_bus.publish(EventCategory::Workflow, EventSeverity::Info, EventPayload::WorkflowStarted { execution_id }).await;

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_execution(execution_id).await });
        Ok(execution_id)
    }

    async fn run_execution(self: Arc<Self>, execution_id: Uuid) {
        loop {
            let status = match self.executions.read().await.get(&execution_id) {
                Some(e) => e.status,
                None => return,
            };
            match status {
                WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => return,
                WorkflowStatus::Paused => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
                WorkflowStatus::Running => {}
            }

            let ready = self.ready_tasks(execution_id).await;
            let running_empty = self.executions.read().await.get(&execution_id).map(|e| e.running_tasks.is_empty()).unwrap_or(true);

            if ready.is_empty() {
                if running_empty {
                    self.finalize(execution_id).await;
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            for task in ready {
                if let Some(exec) = self.executions.write().await.get_mut(&execution_id) {
                    exec.running_tasks.insert(task.id);
                }
                let this = Arc::clone(&self);
                tokio::spawn(async move { this.drive_task(execution_id, task).await });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Tasks whose dependencies are satisfied and aren't already in flight.
    /// `Sequential` additionally admits at most one task at a time, in
    /// declaration order, overriding whatever parallelism the dependency
    /// graph alone would allow; every other strategy's phasing (stage
    /// gating for `Pipeline`, branch gating for `ForkJoin`/`MapReduce`)
    /// already falls out of `depends_on`, the same way Hive's own
    /// `Pipeline` decomposition strategy is "structurally identical to
    /// Hierarchical" and needs no separate code path.
    async fn ready_tasks(&self, execution_id: Uuid) -> Vec<WorkflowTask> {
        let Some(exec) = self.executions.read().await.get(&execution_id).cloned() else { return Vec::new() };
        if exec.workflow.strategy == WorkflowStrategy::Sequential && !exec.running_tasks.is_empty() {
            return Vec::new();
        }
        let mut ready: Vec<WorkflowTask> = exec
            .workflow
            .tasks
            .iter()
            .filter(|t| {
                !exec.completed_tasks.contains(&t.id)
                    && !exec.failed_tasks.contains(&t.id)
                    && !exec.running_tasks.contains(&t.id)
                    && t.depends_on.iter().all(|d| exec.completed_tasks.contains(d))
            })
            .cloned()
            .collect();
        if exec.workflow.strategy == WorkflowStrategy::Sequential {
            ready.truncate(1);
        }
        ready
    }

    async fn drive_task(self: Arc<Self>, execution_id: Uuid, task: WorkflowTask) {
        let strategy = self.executions.read().await.get(&execution_id).map(|e| e.workflow.strategy);
        let outcome = if strategy == Some(WorkflowStrategy::Consensus) {
            self.run_consensus(&task).await
        } else {
            match task.kind {
                WorkflowTaskKind::Atomic | WorkflowTaskKind::Fork | WorkflowTaskKind::Join => self.run_atomic(&task).await,
                WorkflowTaskKind::Composite => self.run_composite(&task).await,
                WorkflowTaskKind::Conditional => self.run_conditional(execution_id, &task).await,
                WorkflowTaskKind::Loop => self.run_loop(execution_id, &task).await,
            }
        };

        if let Some(exec) = self.executions.write().await.get_mut(&execution_id) {
            exec.running_tasks.remove(&task.id);
            match outcome {
                TaskOutcome::Completed => {
                    exec.completed_tasks.insert(task.id);
                }
                TaskOutcome::Failed => {
                    exec.failed_tasks.insert(task.id);
                }
                TaskOutcome::Skipped => {
                    exec.skipped_tasks.insert(task.id);
                    exec.completed_tasks.insert(task.id);
                }
            }
        }

        let event = match outcome {
            TaskOutcome::Failed => EventPayload::TaskFailed { task_id: task.id, error: format!("workflow task '{}' failed", task.name) },
            _ => EventPayload::TaskCompleted { task_id: task.id, result: json!({"skipped": outcome == TaskOutcome::Skipped}) },
        };
        self.event_bus.publish(EventCategory::Task, EventSeverity::Info, event).await;
    }

    async fn run_atomic(&self, task: &WorkflowTask) -> TaskOutcome {
        let _decision = self.balancer.select_agent(None, &SystemSnapshot::default()).await;

        let definition = task.task_definition.clone().unwrap_or_else(|| json!({}));
        let command = definition.get("command").and_then(|v| v.as_str()).unwrap_or("bash").to_string();
        let args: Vec<String> = definition
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let options = BackgroundTaskOptions { priority: task.priority, ..Default::default() };

        let Ok(backing_id) = self.executor.submit(BackgroundTaskKind::Workflow, command, args, options).await else {
            return TaskOutcome::Failed;
        };
        self.backing_tasks.write().await.insert(task.id, backing_id);

        let deadline = tokio::time::Instant::now() + self.config.task_timeout;
        match wait_for_task_completion(&self.event_bus, backing_id, deadline).await {
            Some(true) => TaskOutcome::Completed,
            _ => TaskOutcome::Failed,
        }
    }

    async fn run_composite(&self, task: &WorkflowTask) -> TaskOutcome {
        let definition = task.task_definition.clone().unwrap_or_else(|| json!({}));
        let instructions = definition.get("instructions").and_then(|v| v.as_str()).unwrap_or(&task.name).to_string();
        let subtask = Task::new("composite", instructions).with_priority(task.priority);
        match self.hive.decompose_and_execute(vec![subtask], DecompositionStrategy::Parallel, 0).await {
            Ok(outcome) if outcome.failed.is_empty() => TaskOutcome::Completed,
            _ => TaskOutcome::Failed,
        }
    }

    /// Runs a task under a `Consensus` workflow by delegating it to Hive's
    /// consensus-based decomposition rather than submitting it straight to
    /// the Background Executor, the way `run_composite` delegates to
    /// Hive's plain parallel decomposition.
    async fn run_consensus(&self, task: &WorkflowTask) -> TaskOutcome {
        let definition = task.task_definition.clone().unwrap_or_else(|| json!({}));
        let instructions = definition.get("instructions").and_then(|v| v.as_str()).unwrap_or(&task.name).to_string();
        let subtask = Task::new("consensus", instructions).with_priority(task.priority);
        match self.hive.decompose_and_execute(vec![subtask], DecompositionStrategy::ConsensusBased, 0).await {
            Ok(outcome) if outcome.failed.is_empty() => TaskOutcome::Completed,
            _ => TaskOutcome::Failed,
        }
    }

    async fn run_conditional(&self, execution_id: Uuid, task: &WorkflowTask) -> TaskOutcome {
        let variables = self.executions.read().await.get(&execution_id).map(|e| e.variables.clone()).unwrap_or_default();
        if task.conditions.iter().all(|c| c.evaluate(&variables)) {
            self.run_atomic(task).await
        } else {
            TaskOutcome::Skipped
        }
    }

    async fn run_loop(&self, execution_id: Uuid, task: &WorkflowTask) -> TaskOutcome {
        let mut iteration = 0;
        loop {
            if iteration >= task.max_iterations {
                break;
            }
            let variables = self.executions.read().await.get(&execution_id).map(|e| e.variables.clone()).unwrap_or_default();
            if !task.conditions.is_empty() && !task.conditions.iter().all(|c| c.evaluate(&variables)) {
                break;
            }
            match self.run_atomic(task).await {
                TaskOutcome::Completed => {}
                other => return other,
            }
            iteration += 1;
        }
        if iteration >= task.max_iterations {
            warn!(task = %task.name, max_iterations = task.max_iterations, "loop task exhausted its iteration budget");
        }
        TaskOutcome::Completed
    }

    async fn finalize(&self, execution_id: Uuid) {
        let mut executions = self.executions.write().await;
        let Some(exec) = executions.get_mut(&execution_id) else { return };
        let total = exec.workflow.tasks.len();
        let terminal = exec.completed_tasks.len() + exec.failed_tasks.len();
        if terminal < total {
            return;
        }
        exec.status = if exec.failed_tasks.is_empty() { WorkflowStatus::Completed } else { WorkflowStatus::Failed };
        exec.ended_at = Some(chrono::Utc::now());
        let payload = if exec.status == WorkflowStatus::Completed {
            EventPayload::WorkflowCompleted { execution_id }
        } else {
            EventPayload::WorkflowFailed { execution_id, error: format!("{} task(s) failed", exec.failed_tasks.len()) }
        };
        drop(executions);
        self.event_bus.publish(EventCategory::Workflow, EventSeverity::Info, payload).await;
    }

    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        let running_tasks = {
            let mut executions = self.executions.write().await;
            let exec = executions.get_mut(&execution_id).ok_or(WorkflowError::ExecutionNotFound(execution_id))?;
            exec.status = WorkflowStatus::Cancelled;
            exec.ended_at = Some(chrono::Utc::now());
            std::mem::take(&mut exec.running_tasks)
        };
        let backing = self.backing_tasks.read().await;
        for task_id in running_tasks {
            if let Some(&backing_id) = backing.get(&task_id) {
                let _ = self.executor.cancel(backing_id).await;
            }
        }
        self.event_bus.publish(EventCategory::Workflow, EventSeverity::Info, EventPayload::WorkflowCancelled { execution_id }).await;
        Ok(())
    }

    pub async fn pause_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        let mut executions = self.executions.write().await;
        let exec = executions.get_mut(&execution_id).ok_or(WorkflowError::ExecutionNotFound(execution_id))?;
        exec.status = WorkflowStatus::Paused;
        drop(executions);
        self.event_bus.publish(EventCategory::Workflow, EventSeverity::Info, EventPayload::WorkflowPaused { execution_id }).await;
        Ok(())
    }

    pub async fn resume_execution(self: &Arc<Self>, execution_id: Uuid) -> Result<(), WorkflowError> {
        {
            let mut executions = self.executions.write().await;
            let exec = executions.get_mut(&execution_id).ok_or(WorkflowError::ExecutionNotFound(execution_id))?;
            exec.status = WorkflowStatus::Running;
        }
        self.event_bus.publish(EventCategory::Workflow, EventSeverity::Info, EventPayload::WorkflowResumed { execution_id }).await;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_execution(execution_id).await });
        Ok(())
    }

    pub async fn progress(&self, execution_id: Uuid) -> Option<WorkflowProgress> {
        self.executions.read().await.get(&execution_id).map(WorkflowExecution::progress)
    }

    /// Periodic checkpoint pass over every `running` execution.
    #[instrument(skip(self))]
    pub async fn run_checkpoint_sweep(&self) {
        if !self.config.enable_checkpointing {
            return;
        }
        let ids: Vec<Uuid> = {
            let executions = self.executions.read().await;
            executions.values().filter(|e| e.status == WorkflowStatus::Running).map(|e| e.id).collect()
        };
        for id in ids {
            if let Some(exec) = self.executions.write().await.get_mut(&id) {
                exec.checkpoint();
                info!(execution_id = %id, "workflow checkpoint taken");
            }
            self.event_bus.publish(EventCategory::Workflow, EventSeverity::Debug, EventPayload::WorkflowCheckpoint { execution_id: id }).await;
        }
    }

    /// Restore a crashed execution from its latest checkpoint; tasks
    /// recorded as `running` at checkpoint time are re-queued.
    pub async fn recover_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        let mut executions = self.executions.write().await;
        let exec = executions.get_mut(&execution_id).ok_or(WorkflowError::ExecutionNotFound(execution_id))?;
        let requeued = exec.recover_from_latest_checkpoint();
        info!(execution_id = %execution_id, requeued = requeued.len(), "workflow execution recovered from checkpoint");
        Ok(())
    }
}

fn validate_workflow(workflow: &Workflow) -> Result<(), WorkflowError> {
    for task in &workflow.tasks {
        if matches!(task.kind, WorkflowTaskKind::Atomic | WorkflowTaskKind::Composite) && task.task_definition.is_none() {
            return Err(WorkflowError::MissingTaskDefinition(task.id));
        }
    }
    assert_is_dag(&workflow.tasks)
}

fn assert_is_dag(tasks: &[WorkflowTask]) -> Result<(), WorkflowError> {
    let ids: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
    let mut indegree: HashMap<Uuid, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for task in tasks {
        for dep in &task.depends_on {
            if ids.contains(dep) {
                adjacency.entry(*dep).or_default().push(task.id);
                *indegree.get_mut(&task.id).unwrap() += 1;
            }
        }
    }
    let mut queue: VecDeque<Uuid> = indegree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();
    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        if let Some(neighbors) = adjacency.get(&node) {
            for &next in neighbors {
                let entry = indegree.get_mut(&next).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(next);
                }
            }
        }
    }
    if visited == tasks.len() {
        Ok(())
    } else {
        Err(WorkflowError::CyclicDependencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Agent, CapabilitySet, WorkflowStrategy};
    use crate::services::agent_registry::AgentRegistry;
    use crate::services::background_executor::BackgroundExecutorConfig;
    use crate::services::dependency_graph::DependencyGraph;
    use crate::services::hive_orchestrator::HiveConfig;
    use crate::services::load_balancer::LoadBalancerConfig;
    use crate::services::scheduler::{Scheduler, SchedulerConfig};
    use tokio::sync::Mutex;

    async fn harness() -> Arc<WorkflowOrchestrator> {
        let event_bus = Arc::new(EventBus::new(Default::default()));
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&event_bus)));
        registry.register(Agent::new("worker", CapabilitySet::CODING, 4)).await;
        let graph = Arc::new(Mutex::new(DependencyGraph::new()));
        let executor = BackgroundExecutor::new(BackgroundExecutorConfig::default(), Arc::clone(&event_bus));
        executor.initialize().await;
        let balancer = Arc::new(LoadBalancer::new(LoadBalancerConfig::default(), Arc::clone(&registry), Arc::clone(&event_bus)));
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default(), Arc::clone(&registry), Arc::clone(&graph), Arc::clone(&event_bus)));
        let hive = Arc::new(HiveOrchestrator::new(HiveConfig::default(), registry, scheduler, Arc::clone(&executor), graph, Arc::clone(&event_bus)));
        WorkflowOrchestrator::new(WorkflowOrchestratorConfig::default(), executor, balancer, hive, event_bus)
    }

    #[test]
    fn cyclic_dependencies_are_rejected() {
        let mut a = WorkflowTask::atomic("a", json!({"command": "bash"}));
        let mut b = WorkflowTask::atomic("b", json!({"command": "bash"}));
        a.depends_on.insert(b.id);
        b.depends_on.insert(a.id);
        let wf = Workflow::new("cyclic", WorkflowStrategy::Sequential).with_tasks([a, b]);
        assert!(matches!(validate_workflow(&wf), Err(WorkflowError::CyclicDependencies)));
    }

    #[test]
    fn missing_task_definition_is_rejected() {
        let task = WorkflowTask { task_definition: None, ..WorkflowTask::atomic("a", json!({})) };
        let wf = Workflow::new("bad", WorkflowStrategy::Sequential).with_tasks([task]);
        assert!(matches!(validate_workflow(&wf), Err(WorkflowError::MissingTaskDefinition(_))));
    }

    #[tokio::test]
    async fn execute_workflow_runs_a_single_atomic_task_to_completion() {
        let orchestrator = harness().await;
        let task = WorkflowTask::atomic("echo", json!({"command": "bash", "args": ["-c", "echo hi"]}));
        let wf = Workflow::new("simple", WorkflowStrategy::Sequential).with_tasks([task]);
        let execution_id = orchestrator.execute_workflow(wf).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let progress = orchestrator.progress(execution_id).await.unwrap();
            if progress.percentage >= 100.0 {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("workflow did not finish in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn conditional_task_is_skipped_when_guard_is_false() {
        let orchestrator = harness().await;
        let mut task = WorkflowTask::atomic("maybe", json!({"command": "bash", "args": ["-c", "echo hi"]}));
        task.kind = WorkflowTaskKind::Conditional;
        task.conditions = vec![crate::domain::models::Condition { variable: "go".into(), equals: json!(true) }];
        let wf = Workflow::new("conditional", WorkflowStrategy::Conditional).with_tasks([task]);
        let execution_id = orchestrator.execute_workflow(wf).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let progress = orchestrator.progress(execution_id).await.unwrap();
            if progress.percentage >= 100.0 {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("workflow did not finish in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn capacity_exceeded_once_max_concurrent_workflows_is_reached() {
        let orchestrator = harness().await;
        let config = WorkflowOrchestratorConfig { max_concurrent_workflows: 0, ..WorkflowOrchestratorConfig::default() };
        let orchestrator = Arc::new(WorkflowOrchestrator {
            config,
            executions: RwLock::new(HashMap::new()),
            backing_tasks: RwLock::new(HashMap::new()),
            executor: Arc::clone(&orchestrator.executor),
            balancer: Arc::clone(&orchestrator.balancer),
            hive: Arc::clone(&orchestrator.hive),
            event_bus: Arc::clone(&orchestrator.event_bus),
        });
        let task = WorkflowTask::atomic("a", json!({"command": "bash"}));
        let wf = Workflow::new("full", WorkflowStrategy::Sequential).with_tasks([task]);
        assert!(matches!(orchestrator.execute_workflow(wf).await, Err(WorkflowError::CapacityExceeded(_))));
    }

    #[tokio::test]
    async fn sequential_strategy_admits_one_independent_task_at_a_time() {
        let orchestrator = harness().await;
        let a = WorkflowTask::atomic("a", json!({"command": "bash", "args": ["-c", "sleep 0.2"]}));
        let b = WorkflowTask::atomic("b", json!({"command": "bash", "args": ["-c", "echo b"]}));
        // a and b have no dependency on each other; Parallel would start both at once.
        let wf = Workflow::new("serial", WorkflowStrategy::Sequential).with_tasks([a, b]);
        let execution_id = orchestrator.execute_workflow(wf).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let exec = orchestrator.executions.read().await.get(&execution_id).cloned().unwrap();
        assert_eq!(exec.running_tasks.len(), 1, "sequential strategy must not start a second task while one is in flight");
        drop(exec);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let progress = orchestrator.progress(execution_id).await.unwrap();
            if progress.percentage >= 100.0 {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("workflow did not finish in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn consensus_strategy_routes_through_hive_decomposition() {
        let event_bus = Arc::new(EventBus::new(Default::default()));
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&event_bus)));
        registry.register(Agent::new("worker", CapabilitySet::CODING, 4)).await;
        let graph = Arc::new(Mutex::new(DependencyGraph::new()));
        let executor = BackgroundExecutor::new(BackgroundExecutorConfig::default(), Arc::clone(&event_bus));
        executor.initialize().await;
        let balancer = Arc::new(LoadBalancer::new(LoadBalancerConfig::default(), Arc::clone(&registry), Arc::clone(&event_bus)));
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default(), Arc::clone(&registry), Arc::clone(&graph), Arc::clone(&event_bus)));
        // Short timeout: no vote ever arrives, so the decomposition must
        // fail via Hive's own consensus-timeout path rather than
        // succeeding as a plain background-executor task would.
        let hive_config = HiveConfig { consensus_timeout: Duration::from_millis(100), ..HiveConfig::default() };
        let hive = Arc::new(HiveOrchestrator::new(hive_config, registry, scheduler, Arc::clone(&executor), graph, Arc::clone(&event_bus)));
        let orchestrator = WorkflowOrchestrator::new(WorkflowOrchestratorConfig::default(), executor, balancer, hive, event_bus);

        let task = WorkflowTask::atomic("decide", json!({"instructions": "pick an approach"}));
        let wf = Workflow::new("vote", WorkflowStrategy::Consensus).with_tasks([task]);
        let execution_id = orchestrator.execute_workflow(wf).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let progress = orchestrator.progress(execution_id).await.unwrap();
            if progress.percentage >= 100.0 {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("workflow did not finish in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let progress = orchestrator.progress(execution_id).await.unwrap();
        assert_eq!(progress.failed_tasks, 1, "a vote-less consensus task should fail via Hive, proving Consensus actually dispatched there");
    }
}
