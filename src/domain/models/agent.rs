//! Agent domain model.
//!
//! An agent is a worker with finite capacity: it declares capabilities and
//! a maximum concurrency, and carries rolling performance metrics that the
//! load balancer and scheduler strategies read from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::CapabilitySet;

/// Status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Available,
    Busy,
    Offline,
    Unresponsive,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Unresponsive => "unresponsive",
        }
    }

    pub fn can_accept_work(&self) -> bool {
        matches!(self, Self::Idle | Self::Available | Self::Busy)
    }
}

/// Rolling performance metrics for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_execution_time_ms: f64,
    pub success_rate: f64,
    pub reliability: f64,
    pub speed: f64,
    pub quality: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub last_activity: DateTime<Utc>,
    pub response_time_ms: f64,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            tasks_failed: 0,
            average_execution_time_ms: 0.0,
            success_rate: 1.0,
            reliability: 1.0,
            speed: 1.0,
            quality: 1.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            last_activity: Utc::now(),
            response_time_ms: 0.0,
        }
    }
}

impl AgentMetrics {
    /// Fold in the outcome of a completed attempt using a running mean.
    pub fn record_completion(&mut self, success: bool, duration_ms: f64) {
        let total = self.tasks_completed + self.tasks_failed;
        let new_total = total + 1;
        self.average_execution_time_ms =
            (self.average_execution_time_ms * total as f64 + duration_ms) / new_total as f64;

        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        self.success_rate = self.tasks_completed as f64 / new_total as f64;
        self.reliability = self.success_rate;
        self.last_activity = Utc::now();
    }
}

/// A worker in the coordination runtime's agent pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: uuid::Uuid,
    pub agent_type: String,
    pub capabilities: CapabilitySet,
    pub max_concurrent_tasks: u32,
    pub current_load: u32,
    pub status: AgentStatus,
    pub metrics: AgentMetrics,
    pub priority: u8,
    pub specialization: Vec<String>,
    pub location: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Agent {
    pub fn new(agent_type: impl Into<String>, capabilities: CapabilitySet, max_concurrent_tasks: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            agent_type: agent_type.into(),
            capabilities,
            max_concurrent_tasks,
            current_load: 0,
            status: AgentStatus::Idle,
            metrics: AgentMetrics::default(),
            priority: 5,
            specialization: Vec::new(),
            location: None,
            registered_at: now,
            last_updated: now,
        }
    }

    /// currentLoad / maxCapacity, clamped to [0, 1].
    pub fn workload(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 1.0;
        }
        (f64::from(self.current_load) / f64::from(self.max_concurrent_tasks)).clamp(0.0, 1.0)
    }

    pub fn has_capacity(&self) -> bool {
        self.status.can_accept_work() && self.current_load < self.max_concurrent_tasks
    }

    pub fn acquire_slot(&mut self) -> bool {
        if !self.has_capacity() {
            return false;
        }
        self.current_load += 1;
        self.status = if self.current_load >= self.max_concurrent_tasks {
            AgentStatus::Busy
        } else {
            AgentStatus::Available
        };
        self.last_updated = Utc::now();
        true
    }

    pub fn release_slot(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
        self.status = if self.current_load == 0 { AgentStatus::Idle } else { AgentStatus::Available };
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_is_zero_for_idle_agent() {
        let agent = Agent::new("worker", CapabilitySet::CODING, 4);
        assert_eq!(agent.workload(), 0.0);
    }

    #[test]
    fn acquire_slot_respects_capacity() {
        let mut agent = Agent::new("worker", CapabilitySet::CODING, 2);
        assert!(agent.acquire_slot());
        assert!(agent.acquire_slot());
        assert!(!agent.acquire_slot());
        assert_eq!(agent.status, AgentStatus::Busy);
        assert!((agent.workload() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn release_slot_restores_idle() {
        let mut agent = Agent::new("worker", CapabilitySet::CODING, 1);
        agent.acquire_slot();
        agent.release_slot();
        assert_eq!(agent.current_load, 0);
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[test]
    fn offline_agent_has_no_capacity() {
        let mut agent = Agent::new("worker", CapabilitySet::CODING, 4);
        agent.status = AgentStatus::Offline;
        assert!(!agent.has_capacity());
    }
}
