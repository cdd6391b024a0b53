//! Shared agent registry backing the Load Balancer and Scheduler.
//!
//! A single in-process deployment has no need for a swappable storage
//! backend, so this keeps just the in-memory registry half, guarded the
//! way `circuit_breaker`'s `CircuitBreakerManager` guards its map.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::SchedulerError;
use crate::domain::models::{Agent, AgentStatus};
use crate::services::event_bus::{EventBus, EventCategory, EventPayload, EventSeverity};

pub struct AgentRegistry {
    agents: RwLock<HashMap<Uuid, Agent>>,
    event_bus: Arc<EventBus>,
}

impl AgentRegistry {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self { agents: RwLock::new(HashMap::new()), event_bus }
    }

    pub async fn register(&self, agent: Agent) -> Uuid {
        let id = agent.id;
        self.agents.write().await.insert(id, agent);
        self.event_bus
            .publish(EventCategory::Agent, EventSeverity::Info, EventPayload::AgentRegistered { agent_id: id })
            .await;
        info!(agent_id = %id, "agent registered");
        id
    }

    pub async fn unregister(&self, id: Uuid) -> bool {
        let removed = self.agents.write().await.remove(&id).is_some();
        if removed {
            self.event_bus
                .publish(EventCategory::Agent, EventSeverity::Info, EventPayload::AgentUnregistered { agent_id: id })
                .await;
        }
        removed
    }

    pub async fn get(&self, id: Uuid) -> Option<Agent> {
        self.agents.read().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Agent> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Apply a mutation under the registry's write lock and mark the
    /// agent's `lastUpdated`. Returns `false` if the agent is unknown.
    pub async fn mutate(&self, id: Uuid, f: impl FnOnce(&mut Agent)) -> bool {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&id) else { return false };
        f(agent);
        agent.last_updated = Utc::now();
        true
    }

    pub async fn acquire_slot(&self, id: Uuid) -> Result<(), SchedulerError> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id).ok_or(SchedulerError::UnknownAgent(id))?;
        agent.acquire_slot();
        Ok(())
    }

    pub async fn release_slot(&self, id: Uuid) {
        if let Some(agent) = self.agents.write().await.get_mut(&id) {
            agent.release_slot();
        }
    }

    /// Mark any agent whose `lastUpdated` is older than `2 * health_check_interval`
    /// as unresponsive, emitting one event per transition.
    pub async fn sweep_unresponsive(&self, health_check_interval: chrono::Duration) {
        let threshold = health_check_interval * 2;
        let now = Utc::now();
        let mut newly_unresponsive = Vec::new();
        {
            let mut agents = self.agents.write().await;
            for agent in agents.values_mut() {
                if agent.status != AgentStatus::Unresponsive && now - agent.last_updated > threshold {
                    agent.status = AgentStatus::Unresponsive;
                    newly_unresponsive.push(agent.id);
                }
            }
        }
        for id in newly_unresponsive {
            self.event_bus
                .publish(EventCategory::Agent, EventSeverity::Warning, EventPayload::AgentUnresponsive { agent_id: id })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CapabilitySet;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(Default::default()))
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = AgentRegistry::new(bus());
        let agent = Agent::new("worker", CapabilitySet::CODING, 4);
        let id = registry.register(agent).await;
        assert!(registry.get(id).await.is_some());
    }

    #[tokio::test]
    async fn sweep_marks_stale_agents_unresponsive() {
        let registry = AgentRegistry::new(bus());
        let mut agent = Agent::new("worker", CapabilitySet::CODING, 4);
        agent.last_updated = Utc::now() - chrono::Duration::minutes(10);
        let id = registry.register(agent).await;

        registry.sweep_unresponsive(chrono::Duration::seconds(1)).await;
        assert_eq!(registry.get(id).await.unwrap().status, AgentStatus::Unresponsive);
    }
}
