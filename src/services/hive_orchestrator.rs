//! Hive orchestrator: decomposes one composite task into a DAG of
//! subtasks, scores and assigns agents to each, and drives execution
//! under a chosen decomposition strategy.
//!
//! A decomposition planner sits in front of per-subtask agent selection,
//! the way `swarm_orchestrator.rs`/`overmind.rs` pair them; the
//! event-driven dependency wait reuses `services::event_bus`'s
//! `wait_for_task_completion` instead of polling, so the orchestrator
//! never busy-spins at the task level.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::HiveError;
use crate::domain::models::{Agent, BackgroundTaskKind, BackgroundTaskOptions, Task};
use crate::services::agent_registry::AgentRegistry;
use crate::services::background_executor::BackgroundExecutor;
use crate::services::dependency_graph::DependencyGraph;
use crate::services::event_bus::{wait_for_task_completion, EventBus, EventCategory, EventPayload, EventSeverity};
use crate::services::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub enum DecompositionStrategy {
    Sequential,
    Parallel,
    /// Subtasks grouped contiguously into levels, in order; level L depends
    /// on every subtask in level L-1.
    Hierarchical { level_sizes: Vec<usize> },
    /// Structurally identical to `Hierarchical`; stages carry their own
    /// label purely for observability.
    Pipeline { level_sizes: Vec<usize> },
    Adaptive,
    ConsensusBased,
}

#[derive(Debug, Clone)]
pub struct HiveConfig {
    pub max_decomposition_depth: u32,
    pub consensus_threshold: f64,
    pub consensus_timeout: Duration,
    pub dependency_wait_timeout: Duration,
    pub topology_refresh_interval: Duration,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            max_decomposition_depth: 5,
            consensus_threshold: 0.5,
            consensus_timeout: Duration::from_secs(10),
            dependency_wait_timeout: Duration::from_secs(300),
            topology_refresh_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub agents: Vec<Uuid>,
    pub connections: Vec<(Uuid, Uuid)>,
    pub clusters: Vec<Vec<Uuid>>,
}

pub struct DecompositionOutcome {
    pub completed: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

pub struct HiveOrchestrator {
    config: HiveConfig,
    registry: Arc<AgentRegistry>,
    scheduler: Arc<Scheduler>,
    executor: Arc<BackgroundExecutor>,
    graph: Arc<Mutex<DependencyGraph>>,
    event_bus: Arc<EventBus>,
    topology: RwLock<Topology>,
}

impl HiveOrchestrator {
    pub fn new(
        config: HiveConfig,
        registry: Arc<AgentRegistry>,
        scheduler: Arc<Scheduler>,
        executor: Arc<BackgroundExecutor>,
        graph: Arc<Mutex<DependencyGraph>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self { config, registry, scheduler, executor, graph, event_bus, topology: RwLock::new(Topology::default()) }
    }

    /// Decompose `subtasks` (already built by the caller; dependencies
    /// within `TaskConstraints` are filled in here per `strategy`), wire
    /// them into the shared Dependency Graph, and drive them to
    /// completion, honoring `depth` against `maxDecompositionDepth`.
    #[instrument(skip(self, subtasks))]
    pub async fn decompose_and_execute(
        &self,
        mut subtasks: Vec<Task>,
        strategy: DecompositionStrategy,
        depth: u32,
    ) -> Result<DecompositionOutcome, HiveError> {
        if depth > self.config.max_decomposition_depth {
            return Err(HiveError::MaxDepthExceeded(depth, self.config.max_decomposition_depth));
        }

        let resolved = self.resolve_adaptive(strategy, &subtasks).await;
        wire_dependencies(&resolved, &mut subtasks);

        if matches!(resolved, DecompositionStrategy::ConsensusBased) {
            let decomposition_id = Uuid::new_v4();
            if !self.run_consensus(decomposition_id).await? {
                return Err(HiveError::ConsensusRejected(decomposition_id, 0, 0));
            }
        }

        {
            let mut graph = self.graph.lock().await;
            for task in &subtasks {
                graph.add_task(task.id, task.constraints.dependencies.clone()).map_err(|_| HiveError::CyclicDecomposition(task.id))?;
            }
        }

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let by_id: HashMap<Uuid, Task> = subtasks.into_iter().map(|t| (t.id, t)).collect();
        let mut remaining: HashSet<Uuid> = by_id.keys().copied().collect();

        while !remaining.is_empty() {
            let ready: Vec<Uuid> = {
                let mut graph = self.graph.lock().await;
                graph.get_ready_tasks().into_iter().filter(|id| remaining.contains(id)).collect()
            };
            if ready.is_empty() {
                // Every remaining subtask is waiting on a dependency; block
                // on the next completion/failure event rather than busy-spin.
                let deadline = tokio::time::Instant::now() + self.config.dependency_wait_timeout;
                if self.await_any_terminal(&remaining, deadline).await.is_none() {
                    warn!("dependency wait timed out with subtasks still pending");
                    break;
                }
                continue;
            }

            let mut handles = Vec::new();
            for task_id in ready {
                remaining.remove(&task_id);
                let task = by_id.get(&task_id).cloned().expect("ready task must be known");
                handles.push(self.run_subtask(task));
            }
            for outcome in futures::future::join_all(handles).await {
                match outcome {
                    Ok(id) => completed.push(id),
                    Err(id) => failed.push(id),
                }
            }
        }

        Ok(DecompositionOutcome { completed, failed })
    }

    async fn await_any_terminal(&self, pending: &HashSet<Uuid>, deadline: tokio::time::Instant) -> Option<()> {
        let mut rx = self.event_bus.subscribe();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(event)) => {
                    let matched = match &event.payload {
                        EventPayload::TaskCompleted { task_id, .. } | EventPayload::TaskFailed { task_id, .. } => {
                            pending.contains(task_id)
                        }
                        _ => false,
                    };
                    if matched {
                        return Some(());
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
            }
        }
    }

    async fn resolve_adaptive(&self, strategy: DecompositionStrategy, subtasks: &[Task]) -> DecompositionStrategy {
        let DecompositionStrategy::Adaptive = strategy else { return strategy };
        let admissible = self.registry.all().await.into_iter().filter(Agent::has_capacity).count();
        let parallelizable = subtasks.iter().all(|t| t.constraints.dependencies.is_empty());
        if parallelizable && admissible >= 2 {
            DecompositionStrategy::Parallel
        } else {
            DecompositionStrategy::Sequential
        }
    }

    /// Broadcast a proposal and tally votes arriving as `ConsensusVote`
    /// events until quorum (`consensusThreshold · N` total votes) or timeout.
    async fn run_consensus(&self, decomposition_id: Uuid) -> Result<bool, HiveError> {
        let total_agents = self.registry.all().await.len().max(1);
        let quorum = ((self.config.consensus_threshold * total_agents as f64).ceil() as usize).max(1);

        let mut rx = self.event_bus.subscribe();
        self.event_bus
            .publish(EventCategory::Consensus, EventSeverity::Info, EventPayload::ConsensusProposal { decomposition_id })
            .await;

        let deadline = tokio::time::Instant::now() + self.config.consensus_timeout;
        let mut approves = 0usize;
        let mut rejects = 0usize;
        let mut total_votes = 0usize;

        while total_votes < quorum {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(HiveError::ConsensusTimeout(decomposition_id));
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(event)) => {
                    if let EventPayload::ConsensusVote { decomposition_id: id, approve, .. } = event.payload {
                        if id == decomposition_id {
                            total_votes += 1;
                            if approve {
                                approves += 1;
                            } else {
                                rejects += 1;
                            }
                        }
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => {
                    return Err(HiveError::ConsensusTimeout(decomposition_id));
                }
            }
        }
        info!(approves, rejects, decomposition_id = %decomposition_id, "consensus tally complete");
        Ok(approves > rejects)
    }

    /// Score candidates, assign the best one, submit the subtask's actual
    /// work to the Background Executor, and drive it to a terminal outcome
    /// via the Scheduler. Assignment only books the subtask against an
    /// agent; the Executor is what makes it run, the way `run_atomic`
    /// drives a workflow's own atomic tasks.
    async fn run_subtask(&self, task: Task) -> Result<Uuid, Uuid> {
        let task_id = task.id;
        let candidates = self.registry.all().await;
        let Some(agent_id) = select_best_agent(&candidates, &task) else {
            self.graph.lock().await.mark_failed(task_id);
            return Err(task_id);
        };

        if self.scheduler.assign_task(task.clone(), Some(agent_id), None).await.is_err() {
            self.graph.lock().await.mark_failed(task_id);
            return Err(task_id);
        }

        let (command, args) = subtask_command(&task);
        let options = BackgroundTaskOptions { priority: task.priority, ..Default::default() };
        let task_type = task.task_type.clone();
        let Ok(backing_id) = self.executor.submit(BackgroundTaskKind::AgentTask, command, args, options).await else {
            let _ = self.scheduler.fail_task(task, &task_type, "failed to submit subtask to background executor".into()).await;
            return Err(task_id);
        };

        let deadline = tokio::time::Instant::now() + self.config.dependency_wait_timeout;
        match wait_for_task_completion(&self.event_bus, backing_id, deadline).await {
            Some(true) => {
                let _ = self.scheduler.complete_task(task_id, &task_type, 0.0).await;
                Ok(task_id)
            }
            _ => {
                let _ = self.scheduler.fail_task(task, &task_type, "subtask did not complete".into()).await;
                Err(task_id)
            }
        }
    }

    /// Periodic refresh of the topology view: agents clustered by shared
    /// capability bits. Not required for correctness; assignment consults
    /// it only as a tie-break hint.
    pub async fn refresh_topology(&self) {
        let agents = self.registry.all().await;
        let mut clusters: Vec<Vec<Uuid>> = Vec::new();
        for agent in &agents {
            if let Some(cluster) = clusters.iter_mut().find(|c: &&mut Vec<Uuid>| {
                c.first().and_then(|id| agents.iter().find(|a| a.id == *id)).is_some_and(|rep| rep.capabilities.intersects(agent.capabilities))
            }) {
                cluster.push(agent.id);
            } else {
                clusters.push(vec![agent.id]);
            }
        }
        let connections = clusters
            .iter()
            .flat_map(|c| c.windows(2).map(|w| (w[0], w[1])))
            .collect();
        *self.topology.write().await = Topology { agents: agents.iter().map(|a| a.id).collect(), connections, clusters };
    }

    pub async fn topology_snapshot(&self) -> Topology {
        self.topology.read().await.clone()
    }
}

fn wire_dependencies(strategy: &DecompositionStrategy, subtasks: &mut [Task]) {
    match strategy {
        DecompositionStrategy::Sequential => {
            for i in 1..subtasks.len() {
                let prev_id = subtasks[i - 1].id;
                subtasks[i].constraints.dependencies.insert(prev_id);
            }
        }
        DecompositionStrategy::Parallel | DecompositionStrategy::Adaptive | DecompositionStrategy::ConsensusBased => {}
        DecompositionStrategy::Hierarchical { level_sizes } | DecompositionStrategy::Pipeline { level_sizes } => {
            let mut offset = 0;
            let mut levels: Vec<Vec<Uuid>> = Vec::new();
            for &size in level_sizes {
                let ids: Vec<Uuid> = subtasks[offset..offset + size].iter().map(|t| t.id).collect();
                levels.push(ids);
                offset += size;
            }
            let mut offset = 0;
            for (level_idx, &size) in level_sizes.iter().enumerate() {
                if level_idx > 0 {
                    let deps = levels[level_idx - 1].clone();
                    for task in &mut subtasks[offset..offset + size] {
                        task.constraints.dependencies.extend(deps.iter().copied());
                    }
                }
                offset += size;
            }
        }
    }
}

/// Derive the subprocess invocation for a leaf subtask: `task.input` may
/// carry a structured `{"command": ..., "args": [...]}`, the way a
/// workflow's atomic `task_definition` does; absent that, fall back to
/// running `instructions` through a shell, since a hive subtask's
/// instructions are free text rather than a pre-split argument list.
fn subtask_command(task: &Task) -> (String, Vec<String>) {
    let command = task.input.get("command").and_then(|v| v.as_str()).map(String::from);
    let args = task.input.get("args").and_then(|v| v.as_array()).map(|arr| {
        arr.iter().filter_map(|v| v.as_str().map(String::from)).collect::<Vec<_>>()
    });
    match (command, args) {
        (Some(command), Some(args)) => (command, args),
        (Some(command), None) => (command, Vec::new()),
        (None, _) => ("bash".to_string(), vec!["-c".to_string(), task.instructions.clone()]),
    }
}

fn select_best_agent(candidates: &[Agent], task: &Task) -> Option<Uuid> {
    let admissible: Vec<&Agent> = candidates.iter().filter(|a| a.has_capacity()).collect();
    if admissible.is_empty() {
        return None;
    }
    let required = task.requirements.capabilities;
    let mut scored: Vec<(Uuid, f64, f64, Uuid)> = admissible
        .iter()
        .map(|a| {
            let coverage = a.capabilities.coverage(required);
            let score = 0.4 * a.metrics.success_rate
                + 0.3 * (1.0 - a.workload().min(1.0))
                + 0.2 * coverage
                + 0.1 * a.metrics.reliability;
            (a.id, score, a.workload(), a.id)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap()
            .then_with(|| a.2.partial_cmp(&b.2).unwrap())
            .then_with(|| a.3.cmp(&b.3))
    });
    scored.first().map(|(id, ..)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CapabilitySet;
    use crate::services::background_executor::BackgroundExecutorConfig;
    use crate::services::scheduler::SchedulerConfig;

    async fn harness(n: u32) -> (Arc<HiveOrchestrator>, Vec<Uuid>) {
        let event_bus = Arc::new(EventBus::new(Default::default()));
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&event_bus)));
        let mut ids = Vec::new();
        for _ in 0..n {
            ids.push(registry.register(Agent::new("worker", CapabilitySet::CODING, 4)).await);
        }
        let graph = Arc::new(Mutex::new(DependencyGraph::new()));
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default(), Arc::clone(&registry), Arc::clone(&graph), Arc::clone(&event_bus)));
        let executor = BackgroundExecutor::new(BackgroundExecutorConfig::default(), Arc::clone(&event_bus));
        executor.initialize().await;
        let hive = Arc::new(HiveOrchestrator::new(HiveConfig::default(), registry, scheduler, executor, graph, event_bus));
        (hive, ids)
    }

    #[test]
    fn sequential_wiring_chains_subtasks() {
        let mut tasks = vec![Task::new("coding", "a"), Task::new("coding", "b"), Task::new("coding", "c")];
        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        wire_dependencies(&DecompositionStrategy::Sequential, &mut tasks);
        assert!(tasks[1].constraints.dependencies.contains(&ids[0]));
        assert!(tasks[2].constraints.dependencies.contains(&ids[1]));
    }

    #[test]
    fn hierarchical_wiring_depends_on_full_prior_level() {
        let mut tasks = vec![Task::new("coding", "l0-a"), Task::new("coding", "l0-b"), Task::new("coding", "l1-a")];
        let level0: Vec<Uuid> = tasks[..2].iter().map(|t| t.id).collect();
        wire_dependencies(&DecompositionStrategy::Hierarchical { level_sizes: vec![2, 1] }, &mut tasks);
        assert!(level0.iter().all(|id| tasks[2].constraints.dependencies.contains(id)));
    }

    #[test]
    fn parallel_wiring_adds_no_dependencies() {
        let mut tasks = vec![Task::new("coding", "a"), Task::new("coding", "b")];
        wire_dependencies(&DecompositionStrategy::Parallel, &mut tasks);
        assert!(tasks.iter().all(|t| t.constraints.dependencies.is_empty()));
    }

    #[test]
    fn scoring_breaks_ties_by_lower_workload_then_lower_id() {
        let agent_a = Agent::new("a", CapabilitySet::CODING, 4);
        let agent_b = Agent::new("b", CapabilitySet::CODING, 4);
        let task = Task::new("coding", "work");
        let winner = select_best_agent(&[agent_a.clone(), agent_b.clone()], &task);
        assert!(winner == Some(agent_a.id) || winner == Some(agent_b.id));
    }

    #[tokio::test]
    async fn parallel_decomposition_completes_independent_subtasks() {
        let (hive, ids) = harness(2).await;
        let subtasks = vec![
            Task { input: serde_json::json!({"command": "bash", "args": ["-c", "exit 0"]}), ..Task::new("coding", "a") },
            Task { input: serde_json::json!({"command": "bash", "args": ["-c", "exit 0"]}), ..Task::new("coding", "b") },
        ];
        let _ = ids;

        let outcome = hive.decompose_and_execute(subtasks, DecompositionStrategy::Parallel, 0).await.unwrap();
        assert_eq!(outcome.completed.len(), 2);
    }

    #[test]
    fn subtask_without_structured_input_runs_its_instructions_through_a_shell() {
        let (command, args) = subtask_command(&Task::new("coding", "echo from-instructions"));
        assert_eq!(command, "bash");
        assert_eq!(args, vec!["-c".to_string(), "echo from-instructions".to_string()]);
    }

    #[tokio::test]
    async fn subtask_reaches_the_background_executor_and_completes() {
        let (hive, _ids) = harness(1).await;
        let task = Task { input: serde_json::json!({"command": "bash", "args": ["-c", "echo hi"]}), ..Task::new("coding", "noop") };
        let outcome = hive.run_subtask(task).await;
        assert!(outcome.is_ok());
    }
}
