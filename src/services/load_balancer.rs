//! Load balancer: admission filtering, pluggable selection strategies, a
//! pre-emptive rules engine, load prediction, and periodic rebalancing.
//!
//! A rules-first-match gate sits in front of a scored selection strategy,
//! the way `event_scheduler.rs`/`model_router.rs` pair them elsewhere in
//! this family of services; per-agent load history is guarded the same
//! `RwLock<HashMap<..>>` way `circuit_breaker.rs` guards its registry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::error::BalancerError;
use crate::domain::models::Agent;
use crate::services::agent_registry::AgentRegistry;
use crate::services::event_bus::{EventBus, EventCategory, EventPayload, EventSeverity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancingStrategy {
    RoundRobin,
    LeastConnections,
    LeastLoaded,
    WeightedRoundRobin,
    PerformanceBased,
    CostBased,
    Hybrid,
    Predictive,
    Adaptive,
}

#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    pub default_strategy: BalancingStrategy,
    pub max_load_threshold: f64,
    pub error_rate_threshold: f64,
    pub health_check_interval: ChronoDuration,
    pub rebalance_interval: ChronoDuration,
    pub prediction_window: ChronoDuration,
    pub enable_prediction: bool,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            default_strategy: BalancingStrategy::Hybrid,
            max_load_threshold: 0.8,
            error_rate_threshold: 0.3,
            health_check_interval: ChronoDuration::seconds(30),
            rebalance_interval: ChronoDuration::seconds(60),
            prediction_window: ChronoDuration::seconds(15),
            enable_prediction: true,
        }
    }
}

/// Pre-emptive routing rule, evaluated before strategy selection.
#[derive(Debug, Clone)]
pub struct BalancingRule {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub condition: fn(&Agent, &SystemSnapshot) -> bool,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Prefer,
    Exclude,
}

#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    pub system_error_rate: f64,
    pub system_load: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancingDecision {
    pub selected_agent: Option<Uuid>,
    pub confidence: f64,
    pub reasoning: String,
    pub alternatives: Vec<Uuid>,
}

impl BalancingDecision {
    fn none(reasoning: impl Into<String>) -> Self {
        Self { selected_agent: None, confidence: 0.0, reasoning: reasoning.into(), alternatives: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy)]
struct LoadObservation {
    at: DateTime<Utc>,
    load: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadPrediction {
    pub predicted_load: f64,
    pub confidence: f64,
}

fn agent_error_rate(agent: &Agent) -> f64 {
    1.0 - agent.metrics.success_rate
}

fn agent_avg_response_time(agent: &Agent) -> f64 {
    agent.metrics.response_time_ms
}

fn agent_throughput(agent: &Agent) -> f64 {
    agent.metrics.tasks_completed as f64
}

pub struct LoadBalancer {
    config: RwLock<LoadBalancerConfig>,
    registry: Arc<AgentRegistry>,
    event_bus: Arc<EventBus>,
    round_robin_cursor: AtomicUsize,
    load_history: RwLock<HashMap<Uuid, VecDeque<LoadObservation>>>,
    predictions: RwLock<HashMap<Uuid, LoadPrediction>>,
    rules: RwLock<Vec<BalancingRule>>,
}

impl LoadBalancer {
    pub fn new(config: LoadBalancerConfig, registry: Arc<AgentRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            config: RwLock::new(config),
            registry,
            event_bus,
            round_robin_cursor: AtomicUsize::new(0),
            load_history: RwLock::new(HashMap::new()),
            predictions: RwLock::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_rule(&self, rule: BalancingRule) {
        let mut rules = self.rules.write().await;
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Admission filter: drop agents at or over capacity, over the load
    /// threshold, or over the error-rate threshold.
    async fn admissible_agents(&self, config: &LoadBalancerConfig) -> Vec<Agent> {
        self.registry
            .all()
            .await
            .into_iter()
            .filter(|a| a.status.can_accept_work())
            .filter(|a| a.current_load < a.max_concurrent_tasks)
            .filter(|a| a.workload() <= config.max_load_threshold)
            .filter(|a| agent_error_rate(a) <= config.error_rate_threshold)
            .collect()
    }

    /// Pick one agent for a request, honoring rules before falling back to
    /// the configured (or overridden) strategy.
    #[instrument(skip(self, snapshot))]
    pub async fn select_agent(
        &self,
        strategy_override: Option<BalancingStrategy>,
        snapshot: &SystemSnapshot,
    ) -> BalancingDecision {
        let config = self.config.read().await.clone();
        let mut candidates = self.admissible_agents(&config).await;
        if candidates.is_empty() {
            return BalancingDecision::none("no admissible agent passed the balancer's filters");
        }

        for rule in self.rules.read().await.iter().filter(|r| r.enabled) {
            match rule.action {
                RuleAction::Exclude => candidates.retain(|a| !(rule.condition)(a, snapshot)),
                RuleAction::Prefer => {
                    if let Some(preferred) = candidates.iter().find(|a| (rule.condition)(a, snapshot)).cloned() {
                        return BalancingDecision {
                            selected_agent: Some(preferred.id),
                            confidence: 1.0,
                            reasoning: format!("rule '{}' pre-empted selection", rule.name),
                            alternatives: Vec::new(),
                        };
                    }
                }
            }
        }
        if candidates.is_empty() {
            return BalancingDecision::none("rules engine excluded every admissible agent");
        }

        let strategy = strategy_override.unwrap_or(config.default_strategy);
        let resolved = self.resolve_adaptive(strategy, &candidates, snapshot).await;
        self.run_strategy(resolved, &candidates).await
    }

    async fn resolve_adaptive(&self, strategy: BalancingStrategy, candidates: &[Agent], snapshot: &SystemSnapshot) -> BalancingStrategy {
        if strategy != BalancingStrategy::Adaptive {
            return strategy;
        }
        if snapshot.system_error_rate > 0.1 {
            BalancingStrategy::PerformanceBased
        } else if snapshot.system_load > 0.8 {
            BalancingStrategy::LeastLoaded
        } else if self.config.read().await.enable_prediction && self.predictions_cover(candidates).await {
            BalancingStrategy::Predictive
        } else {
            BalancingStrategy::Hybrid
        }
    }

    async fn predictions_cover(&self, candidates: &[Agent]) -> bool {
        let predictions = self.predictions.read().await;
        candidates.iter().all(|a| predictions.contains_key(&a.id))
    }

    async fn run_strategy(&self, strategy: BalancingStrategy, candidates: &[Agent]) -> BalancingDecision {
        let scored: Vec<(Uuid, f64)> = match strategy {
            BalancingStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::SeqCst) % candidates.len();
                candidates.iter().enumerate().map(|(i, a)| (a.id, if i == idx { 1.0 } else { 0.0 })).collect()
            }
            BalancingStrategy::LeastConnections => {
                candidates.iter().map(|a| (a.id, -(a.current_load as f64))).collect()
            }
            BalancingStrategy::LeastLoaded => candidates.iter().map(|a| (a.id, -a.workload())).collect(),
            BalancingStrategy::WeightedRoundRobin => {
                candidates.iter().map(|a| (a.id, f64::from(a.max_concurrent_tasks))).collect()
            }
            BalancingStrategy::PerformanceBased => candidates.iter().map(|a| (a.id, performance_score(a))).collect(),
            BalancingStrategy::CostBased => candidates.iter().map(|a| (a.id, -cost_score(a))).collect(),
            BalancingStrategy::Hybrid => candidates.iter().map(|a| (a.id, hybrid_score(a))).collect(),
            BalancingStrategy::Predictive => {
                let predictions = self.predictions.read().await;
                candidates
                    .iter()
                    .map(|a| {
                        let score = predictions
                            .get(&a.id)
                            .map(|p| (1.0 - p.predicted_load / f64::from(a.max_concurrent_tasks.max(1))) * p.confidence)
                            .unwrap_or(0.0);
                        (a.id, score)
                    })
                    .collect()
            }
            BalancingStrategy::Adaptive => unreachable!("resolved before scoring"),
        };

        let mut ranked = scored;
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let Some((winner, score)) = ranked.first().copied() else {
            return BalancingDecision::none("scoring produced no candidates");
        };
        let alternatives = ranked.iter().skip(1).take(3).map(|(id, _)| *id).collect();
        BalancingDecision {
            selected_agent: Some(winner),
            confidence: score.clamp(0.0, 1.0),
            reasoning: format!("{strategy:?} strategy selected {winner}"),
            alternatives,
        }
    }

    /// Record a load observation and recompute the linear-extrapolation
    /// prediction for one agent. Called on the prediction timer.
    pub async fn observe_load(&self, agent_id: Uuid, load: f64) {
        let mut history = self.load_history.write().await;
        let entries = history.entry(agent_id).or_default();
        entries.push_back(LoadObservation { at: Utc::now(), load });
        while entries.len() > 10 {
            entries.pop_front();
        }
        if entries.len() >= 2 {
            let prediction = extrapolate(entries);
            self.predictions.write().await.insert(agent_id, prediction);
        }
    }

    /// Periodic rebalance pass: compute the utilization spread and, if it
    /// exceeds 30%, emit a rebalancing event and adapt `maxLoadThreshold`.
    pub async fn run_rebalance_pass(&self, system_error_rate: f64, system_load: f64) {
        let agents = self.registry.all().await;
        if agents.is_empty() {
            return;
        }
        let utilizations: Vec<f64> = agents.iter().map(Agent::workload).collect();
        let max = utilizations.iter().cloned().fold(f64::MIN, f64::max);
        let min = utilizations.iter().cloned().fold(f64::MAX, f64::min);
        let imbalance = max - min;
        if imbalance > 0.3 {
            let overloaded: Vec<Uuid> = agents.iter().zip(&utilizations).filter(|(_, u)| **u >= max - f64::EPSILON).map(|(a, _)| a.id).collect();
            let underloaded: Vec<Uuid> = agents.iter().zip(&utilizations).filter(|(_, u)| **u <= min + f64::EPSILON).map(|(a, _)| a.id).collect();
            info!(?overloaded, ?underloaded, imbalance, "load balancer detected imbalance");
            self.event_bus
                .publish(
                    EventCategory::Agent,
                    EventSeverity::Warning,
                    EventPayload::AgentUpdated { agent_id: overloaded.first().copied().unwrap_or_default() },
                )
                .await;
        }

        let mut config = self.config.write().await;
        if system_error_rate > 0.1 {
            config.max_load_threshold = (config.max_load_threshold + 0.05).min(0.9);
        } else if system_load < 0.5 {
            config.max_load_threshold = (config.max_load_threshold - 0.05).max(0.6);
        }
    }

    pub async fn run_health_check(&self) {
        let interval = self.config.read().await.health_check_interval;
        self.registry.sweep_unresponsive(interval).await;
    }

    pub async fn current_threshold(&self) -> f64 {
        self.config.read().await.max_load_threshold
    }
}

fn performance_score(agent: &Agent) -> f64 {
    let response_component = 1.0 - (agent_avg_response_time(agent) / 5_000.0).min(1.0);
    let error_component = 1.0 - (agent_error_rate(agent) / 1.0).min(1.0);
    let throughput_component = (agent_throughput(agent) / 10.0).min(1.0);
    0.3 * response_component + 0.4 * error_component + 0.3 * throughput_component
}

fn cost_score(agent: &Agent) -> f64 {
    (1.0 + agent.workload()) * (1.0 + agent_avg_response_time(agent) / 1_000.0)
}

fn hybrid_score(agent: &Agent) -> f64 {
    0.4 * performance_score(agent) + 0.4 * (1.0 - agent.workload()) + 0.2 * (1.0 / (1.0 + cost_score(agent)))
}

/// Linear regression over the last N observations; confidence fixed at
/// 0.7 as a placeholder until enough history accrues a real fit quality
/// metric.
fn extrapolate(entries: &VecDeque<LoadObservation>) -> LoadPrediction {
    let n = entries.len() as f64;
    let base = entries[0].at;
    let xs: Vec<f64> = entries.iter().map(|e| (e.at - base).num_milliseconds() as f64).collect();
    let ys: Vec<f64> = entries.iter().map(|e| e.load).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        numerator += (x - mean_x) * (y - mean_y);
        denominator += (x - mean_x).powi(2);
    }
    let slope = if denominator.abs() > f64::EPSILON { numerator / denominator } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    let next_x = xs.last().copied().unwrap_or(0.0) + 1_000.0;
    let predicted = (intercept + slope * next_x).max(0.0);
    LoadPrediction { predicted_load: predicted, confidence: 0.7 }
}

pub fn no_admissible_agent_error() -> BalancerError {
    BalancerError::NoAdmissibleAgent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CapabilitySet;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(Default::default()))
    }

    async fn balancer_with_agents(n: u32) -> (LoadBalancer, Vec<Uuid>) {
        let event_bus = bus();
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&event_bus)));
        let mut ids = Vec::new();
        for _ in 0..n {
            let agent = Agent::new("worker", CapabilitySet::CODING, 4);
            ids.push(registry.register(agent).await);
        }
        (LoadBalancer::new(LoadBalancerConfig::default(), registry, event_bus), ids)
    }

    #[tokio::test]
    async fn selects_nothing_when_no_agents_registered() {
        let (balancer, _ids) = balancer_with_agents(0).await;
        let decision = balancer.select_agent(None, &SystemSnapshot::default()).await;
        assert!(decision.selected_agent.is_none());
    }

    #[tokio::test]
    async fn least_loaded_prefers_idle_agent() {
        let (balancer, ids) = balancer_with_agents(2).await;
        balancer.registry.acquire_slot(ids[0]).await.unwrap();
        balancer.registry.acquire_slot(ids[0]).await.unwrap();

        let decision = balancer
            .select_agent(Some(BalancingStrategy::LeastLoaded), &SystemSnapshot::default())
            .await;
        assert_eq!(decision.selected_agent, Some(ids[1]));
    }

    #[tokio::test]
    async fn round_robin_cycles_through_candidates() {
        let (balancer, ids) = balancer_with_agents(2).await;
        let first = balancer.select_agent(Some(BalancingStrategy::RoundRobin), &SystemSnapshot::default()).await;
        let second = balancer.select_agent(Some(BalancingStrategy::RoundRobin), &SystemSnapshot::default()).await;
        assert!(ids.contains(&first.selected_agent.unwrap()));
        assert_ne!(first.selected_agent, second.selected_agent);
    }

    #[tokio::test]
    async fn threshold_tightens_under_sustained_error_rate() {
        let (balancer, _ids) = balancer_with_agents(1).await;
        let before = balancer.current_threshold().await;
        balancer.run_rebalance_pass(0.2, 0.5).await;
        assert!(balancer.current_threshold().await >= before);
    }

    #[tokio::test]
    async fn observe_load_builds_a_prediction_after_two_points() {
        let (balancer, ids) = balancer_with_agents(1).await;
        balancer.observe_load(ids[0], 0.2).await;
        balancer.observe_load(ids[0], 0.4).await;
        assert!(balancer.predictions.read().await.contains_key(&ids[0]));
    }
}
