//! Scheduler: owns the assignment protocol between a `Task` and an
//! `Agent`, tracks per-agent pending queues, and runs the periodic
//! work-stealing pass.
//!
//! Assignment bookkeeping and rolling per-type stats follow
//! `task_service.rs`; the periodic-pass structure used for the steal loop
//! follows `dag_executor.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::SchedulerError;
use crate::domain::models::{Task, TaskPriority, TaskQueue, TaskStatus};
use crate::services::agent_registry::AgentRegistry;
use crate::services::dependency_graph::DependencyGraph;
use crate::services::event_bus::{EventBus, EventCategory, EventPayload, EventSeverity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingStrategy {
    CapabilityWeighted,
    RoundRobin,
    LeastLoaded,
    Affinity,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub default_strategy: SchedulingStrategy,
    pub steal_interval: chrono::Duration,
    pub steal_threshold: usize,
    pub max_steal_batch: usize,
    pub max_retries: u32,
    pub affinity_success_floor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_strategy: SchedulingStrategy::CapabilityWeighted,
            steal_interval: chrono::Duration::seconds(10),
            steal_threshold: 3,
            max_steal_batch: 2,
            max_retries: 3,
            affinity_success_floor: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
struct Assignment {
    agent_id: Uuid,
    assigned_at: DateTime<Utc>,
    strategy: SchedulingStrategy,
}

#[derive(Debug, Clone, Default)]
struct TypeStats {
    runs: u64,
    successes: u64,
    mean_duration_ms: f64,
}

impl TypeStats {
    fn record(&mut self, success: bool, duration_ms: f64) {
        let new_total = self.runs + 1;
        self.mean_duration_ms = (self.mean_duration_ms * self.runs as f64 + duration_ms) / new_total as f64;
        self.runs = new_total;
        if success {
            self.successes += 1;
        }
    }

    fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            1.0
        } else {
            self.successes as f64 / self.runs as f64
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<AgentRegistry>,
    graph: Arc<Mutex<DependencyGraph>>,
    event_bus: Arc<EventBus>,
    assignments: RwLock<HashMap<Uuid, Assignment>>,
    pending_queues: RwLock<HashMap<Uuid, TaskQueue<Task>>>,
    type_stats: RwLock<HashMap<String, TypeStats>>,
    affinity: RwLock<HashMap<(Uuid, String), TypeStats>>,
    round_robin_cursor: std::sync::atomic::AtomicUsize,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<AgentRegistry>,
        graph: Arc<Mutex<DependencyGraph>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            registry,
            graph,
            event_bus,
            assignments: RwLock::new(HashMap::new()),
            pending_queues: RwLock::new(HashMap::new()),
            type_stats: RwLock::new(HashMap::new()),
            affinity: RwLock::new(HashMap::new()),
            round_robin_cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// `assignTask`: resolve strategy, verify or select an admissible
    /// agent, record the assignment, and emit `task:assigned`.
    #[instrument(skip(self, task))]
    pub async fn assign_task(
        &self,
        mut task: Task,
        agent_hint: Option<Uuid>,
        strategy_override: Option<SchedulingStrategy>,
    ) -> Result<Uuid, SchedulerError> {
        let strategy = strategy_override.unwrap_or(self.config.default_strategy);

        let agent_id = if let Some(hint) = agent_hint {
            let agent = self.registry.get(hint).await.ok_or(SchedulerError::UnknownAgent(hint))?;
            if !agent.has_capacity() {
                return Err(SchedulerError::NoAdmissibleAgent(task.id));
            }
            hint
        } else {
            self.select_agent(&task, strategy).await.ok_or(SchedulerError::NoAdmissibleAgent(task.id))?
        };

        self.registry.acquire_slot(agent_id).await?;
        task.assigned_agent = Some(agent_id);
        task.transition(TaskStatus::Assigned, None);

        self.pending_queues
            .write()
            .await
            .entry(agent_id)
            .or_insert_with(TaskQueue::new)
            .enqueue(task.clone(), priority_rank(task.priority));
        self.assignments.write().await.insert(
            task.id,
            Assignment { agent_id, assigned_at: Utc::now(), strategy },
        );

        self.event_bus
            .publish(
                EventCategory::Task,
                EventSeverity::Info,
                EventPayload::TaskAssigned { task_id: task.id, agent_id, strategy: format!("{strategy:?}") },
            )
            .await;
        Ok(agent_id)
    }

    async fn select_agent(&self, task: &Task, strategy: SchedulingStrategy) -> Option<Uuid> {
        let candidates: Vec<_> = self.registry.all().await.into_iter().filter(|a| a.has_capacity()).collect();
        if candidates.is_empty() {
            return None;
        }

        match strategy {
            SchedulingStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % candidates.len();
                Some(candidates[idx].id)
            }
            SchedulingStrategy::LeastLoaded => {
                candidates.iter().min_by(|a, b| a.workload().partial_cmp(&b.workload()).unwrap()).map(|a| a.id)
            }
            SchedulingStrategy::Affinity => {
                let affinity = self.affinity.read().await;
                let best = candidates
                    .iter()
                    .filter_map(|a| {
                        affinity
                            .get(&(a.id, task.task_type.clone()))
                            .filter(|s| s.success_rate() >= self.config.affinity_success_floor)
                            .map(|s| (a.id, s.success_rate()))
                    })
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                match best {
                    Some((id, _)) => Some(id),
                    None => self.select_agent(task, SchedulingStrategy::CapabilityWeighted).await,
                }
            }
            SchedulingStrategy::CapabilityWeighted => {
                let scored: Vec<(Uuid, f64)> = candidates
                    .iter()
                    .map(|a| {
                        let coverage = a.capabilities.coverage(task.requirements.capabilities);
                        let score = 0.6 * coverage + 0.3 * (1.0 - (a.workload()).min(1.0))
                            + 0.1 * (f64::from(a.priority) / 10.0);
                        (a.id, score)
                    })
                    .collect();
                let any_overlap = scored.iter().any(|(_, s)| *s > 0.0);
                if any_overlap {
                    scored.into_iter().max_by(|a, b| a.1.partial_cmp(&b.1).unwrap()).map(|(id, _)| id)
                } else {
                    candidates.first().map(|a| a.id)
                }
            }
        }
    }

    /// `completeTask`: release the agent's slot, update rolling stats,
    /// notify the Dependency Graph, and emit `task:completed`.
    #[instrument(skip(self))]
    pub async fn complete_task(&self, task_id: Uuid, task_type: &str, duration_ms: f64) -> Result<(), SchedulerError> {
        let assignment = self.assignments.write().await.remove(&task_id).ok_or(SchedulerError::NotAssigned(task_id))?;
        self.pending_queues
            .write()
            .await
            .entry(assignment.agent_id)
            .or_insert_with(TaskQueue::new)
            .remove_matching(|t| t.id == task_id);
        self.registry.release_slot(assignment.agent_id).await;
        self.record_stats(assignment.agent_id, task_type, true, duration_ms).await;

        let ready = self.graph.lock().await.mark_completed(task_id);
        if !ready.is_empty() {
            info!(?ready, "dependency graph unblocked tasks after completion");
        }

        self.event_bus
            .publish(
                EventCategory::Task,
                EventSeverity::Info,
                EventPayload::TaskCompleted { task_id, result: serde_json::json!({"durationMs": duration_ms}) },
            )
            .await;
        Ok(())
    }

    /// `failTask`: update stats with success=false, attempt reassignment
    /// if under the retry budget, else mark failed via the Dependency Graph.
    #[instrument(skip(self))]
    pub async fn fail_task(
        &self,
        mut task: Task,
        task_type: &str,
        error: String,
    ) -> Result<Option<Uuid>, SchedulerError> {
        let assignment = self.assignments.write().await.remove(&task.id).ok_or(SchedulerError::NotAssigned(task.id))?;
        self.pending_queues
            .write()
            .await
            .entry(assignment.agent_id)
            .or_insert_with(TaskQueue::new)
            .remove_matching(|t| t.id == task.id);
        self.registry.release_slot(assignment.agent_id).await;
        self.record_stats(assignment.agent_id, task_type, false, 0.0).await;

        if task.retry_count < self.config.max_retries {
            task.retry_count += 1;
            let alternative = self
                .registry
                .all()
                .await
                .into_iter()
                .filter(|a| a.id != assignment.agent_id && a.has_capacity())
                .max_by(|a, b| {
                    a.capabilities
                        .coverage(task.requirements.capabilities)
                        .partial_cmp(&b.capabilities.coverage(task.requirements.capabilities))
                        .unwrap()
                })
                .map(|a| a.id);

            if let Some(new_agent) = alternative {
                self.event_bus
                    .publish(EventCategory::Task, EventSeverity::Warning, EventPayload::TaskRetry { task_id: task.id, attempt: task.retry_count })
                    .await;
                self.assign_task(task, Some(new_agent), Some(assignment.strategy)).await?;
                return Ok(Some(new_agent));
            }
        }

        self.graph.lock().await.mark_failed(task.id);
        self.event_bus
            .publish(EventCategory::Task, EventSeverity::Error, EventPayload::TaskFailed { task_id: task.id, error })
            .await;
        Ok(None)
    }

    async fn record_stats(&self, agent_id: Uuid, task_type: &str, success: bool, duration_ms: f64) {
        self.type_stats.write().await.entry(task_type.to_string()).or_default().record(success, duration_ms);
        self.affinity
            .write()
            .await
            .entry((agent_id, task_type.to_string()))
            .or_default()
            .record(success, duration_ms);
    }

    /// Periodic work-stealing pass. For every victim/thief pair whose
    /// pending-queue gap meets `stealThreshold`, move up to
    /// `maxStealBatch` tasks the thief is capable of running.
    #[instrument(skip(self))]
    pub async fn run_steal_pass(&self) {
        let agent_ids: Vec<Uuid> = self.registry.all().await.into_iter().map(|a| a.id).collect();
        let mut queues = self.pending_queues.write().await;
        let backlog: HashMap<Uuid, usize> = agent_ids.iter().map(|id| (*id, queues.get(id).map_or(0, TaskQueue::len))).collect();

        for &victim in &agent_ids {
            for &thief in &agent_ids {
                if victim == thief {
                    continue;
                }
                let victim_len = backlog.get(&victim).copied().unwrap_or(0);
                let thief_len = backlog.get(&thief).copied().unwrap_or(0);
                if victim_len.saturating_sub(thief_len) < self.config.steal_threshold {
                    continue;
                }
                let Some(thief_agent) = self.registry.get(thief).await else { continue };
                if !thief_agent.has_capacity() {
                    continue;
                }

                let stolen = {
                    let Some(victim_queue) = queues.get(&victim) else { continue };
                    let mut candidates: Vec<Task> = victim_queue
                        .iter()
                        .filter(|t| thief_agent.capabilities.contains(t.requirements.capabilities))
                        .cloned()
                        .collect();
                    // lowest priority, most-recently-enqueued first
                    candidates.reverse();
                    candidates.truncate(self.config.max_steal_batch);
                    candidates
                };
                if stolen.is_empty() {
                    continue;
                }
                let stolen_ids: Vec<Uuid> = stolen.iter().map(|t| t.id).collect();
                if let Some(victim_queue) = queues.get_mut(&victim) {
                    victim_queue.remove_matching(|t| stolen_ids.contains(&t.id));
                }
                let thief_queue = queues.entry(thief).or_insert_with(TaskQueue::new);
                for mut task in stolen {
                    task.assigned_agent = Some(thief);
                    thief_queue.enqueue(task.clone(), priority_rank(task.priority));
                    if let Some(assignment) = self.assignments.write().await.get_mut(&task.id) {
                        assignment.agent_id = thief;
                        assignment.assigned_at = Utc::now();
                    }
                    self.event_bus
                        .publish(
                            EventCategory::WorkStealing,
                            EventSeverity::Info,
                            EventPayload::WorkStealingStolen { task_id: task.id, from_agent: victim, to_agent: thief },
                        )
                        .await;
                }
                warn!(%victim, %thief, count = stolen_ids.len(), "work stolen between agents");
            }
        }
    }

    pub async fn pending_count(&self, agent_id: Uuid) -> usize {
        self.pending_queues.read().await.get(&agent_id).map_or(0, TaskQueue::len)
    }
}

fn priority_rank(priority: TaskPriority) -> u8 {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    {
        priority.rank() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CapabilitySet;
    use crate::services::event_bus::EventBus;

    async fn scheduler_with_agents(n: u32) -> (Scheduler, Vec<Uuid>) {
        let event_bus = Arc::new(EventBus::new(Default::default()));
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&event_bus)));
        let mut ids = Vec::new();
        for _ in 0..n {
            ids.push(registry.register(crate::domain::models::Agent::new("worker", CapabilitySet::CODING, 4)).await);
        }
        let graph = Arc::new(Mutex::new(DependencyGraph::new()));
        (Scheduler::new(SchedulerConfig::default(), registry, graph, event_bus), ids)
    }

    #[tokio::test]
    async fn assign_task_records_assignment_and_increments_load() {
        let (scheduler, ids) = scheduler_with_agents(1).await;
        let task = Task::new("coding", "write a function");
        let agent_id = scheduler.assign_task(task, None, None).await.unwrap();
        assert_eq!(agent_id, ids[0]);
        assert_eq!(scheduler.pending_count(ids[0]).await, 1);
    }

    #[tokio::test]
    async fn complete_task_releases_slot_and_clears_assignment() {
        let (scheduler, ids) = scheduler_with_agents(1).await;
        let task = Task::new("coding", "write a function");
        let task_id = task.id;
        scheduler.assign_task(task, None, None).await.unwrap();
        scheduler.complete_task(task_id, "coding", 120.0).await.unwrap();
        assert_eq!(scheduler.pending_count(ids[0]).await, 0);
        assert!(scheduler.registry.get(ids[0]).await.unwrap().has_capacity());
    }

    #[tokio::test]
    async fn fail_task_under_retry_budget_reassigns() {
        let (scheduler, _ids) = scheduler_with_agents(2).await;
        let task = Task::new("coding", "write a function");
        scheduler.assign_task(task.clone(), None, None).await.unwrap();
        let assigned = scheduler.assignments.read().await.get(&task.id).unwrap().agent_id;
        let mut failing_task = task.clone();
        failing_task.assigned_agent = Some(assigned);
        let outcome = scheduler.fail_task(failing_task, "coding", "boom".into()).await.unwrap();
        assert!(outcome.is_some());
    }

    #[tokio::test]
    async fn steal_pass_moves_tasks_from_overloaded_to_idle_agent() {
        let (scheduler, ids) = scheduler_with_agents(2).await;
        for _ in 0..4 {
            let task = Task::new("coding", "work item");
            scheduler.assign_task(task, Some(ids[0]), None).await.unwrap();
        }
        scheduler.run_steal_pass().await;
        let thief_backlog = scheduler.pending_count(ids[1]).await;
        assert!(thief_backlog > 0);
    }
}
