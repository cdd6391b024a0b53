//! Unified event bus: broadcast-based publish/subscribe with sequence
//! numbering and at-least-once delivery semantics.
//!
//! `tokio::sync::broadcast` channel, `AtomicU64` sequence counter, and
//! correlation context, trimmed to the topic set this runtime actually
//! emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Topic category, mirroring the prefix of the payload's emitted topic
/// name (`task:*`, `agent:*`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Task,
    Agent,
    WorkStealing,
    CircuitBreaker,
    Workflow,
    Consensus,
    System,
}

/// The unified event envelope delivered to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub correlation_id: Option<Uuid>,
    pub payload: EventPayload,
}

impl UnifiedEvent {
    fn new(category: EventCategory, severity: EventSeverity, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            sequence: SequenceNumber(0),
            timestamp: Utc::now(),
            severity,
            category,
            correlation_id: None,
            payload,
        }
    }
}

/// Every topic this runtime emits, tagged for JSON round-tripping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    TaskSubmitted { task_id: Uuid },
    TaskAssigned { task_id: Uuid, agent_id: Uuid, strategy: String },
    TaskStarted { task_id: Uuid },
    TaskCompleted { task_id: Uuid, result: serde_json::Value },
    TaskFailed { task_id: Uuid, error: String },
    TaskCancelled { task_id: Uuid },
    TaskTimeout { task_id: Uuid },
    TaskRetry { task_id: Uuid, attempt: u32 },

    AgentRegistered { agent_id: Uuid },
    AgentUnregistered { agent_id: Uuid },
    AgentUpdated { agent_id: Uuid },
    AgentUnresponsive { agent_id: Uuid },

    WorkStealingStolen { task_id: Uuid, from_agent: Uuid, to_agent: Uuid },

    CircuitBreakerStateChanged {
        name: String,
        old_state: String,
        new_state: String,
        failures: u32,
        successes: u32,
    },

    WorkflowCreated { execution_id: Uuid },
    WorkflowStarted { execution_id: Uuid },
    WorkflowPaused { execution_id: Uuid },
    WorkflowResumed { execution_id: Uuid },
    WorkflowCancelled { execution_id: Uuid },
    WorkflowCompleted { execution_id: Uuid },
    WorkflowFailed { execution_id: Uuid, error: String },
    WorkflowCheckpoint { execution_id: Uuid },

    ConsensusProposal { decomposition_id: Uuid },
    ConsensusVote { decomposition_id: Uuid, agent_id: Uuid, approve: bool },

    SystemShutdown,
}

impl EventPayload {
    /// The dotted topic name this payload publishes under.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task:submitted",
            Self::TaskAssigned { .. } => "task:assigned",
            Self::TaskStarted { .. } => "task:started",
            Self::TaskCompleted { .. } => "task:completed",
            Self::TaskFailed { .. } => "task:failed",
            Self::TaskCancelled { .. } => "task:cancelled",
            Self::TaskTimeout { .. } => "task:timeout",
            Self::TaskRetry { .. } => "task:retry",
            Self::AgentRegistered { .. } => "agent:registered",
            Self::AgentUnregistered { .. } => "agent:unregistered",
            Self::AgentUpdated { .. } => "agent:updated",
            Self::AgentUnresponsive { .. } => "agent:unresponsive",
            Self::WorkStealingStolen { .. } => "work_stealing:stolen",
            Self::CircuitBreakerStateChanged { .. } => "circuit_breaker:state_changed",
            Self::WorkflowCreated { .. } => "workflow:created",
            Self::WorkflowStarted { .. } => "workflow:started",
            Self::WorkflowPaused { .. } => "workflow:paused",
            Self::WorkflowResumed { .. } => "workflow:resumed",
            Self::WorkflowCancelled { .. } => "workflow:cancelled",
            Self::WorkflowCompleted { .. } => "workflow:completed",
            Self::WorkflowFailed { .. } => "workflow:failed",
            Self::WorkflowCheckpoint { .. } => "workflow:checkpoint",
            Self::ConsensusProposal { .. } => "consensus:proposal",
            Self::ConsensusVote { .. } => "consensus:vote",
            Self::SystemShutdown => "system:shutdown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// Central broadcast bus. Delivery is at-least-once: a lagging subscriber
/// observes a `RecvError::Lagged` and must resynchronize; handlers must be
/// idempotent.
pub struct EventBus {
    sender: broadcast::Sender<UnifiedEvent>,
    sequence: AtomicU64,
    correlation_context: Arc<RwLock<Option<Uuid>>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
            correlation_context: Arc::new(RwLock::new(None)),
        }
    }

    /// Publish a payload, category, and severity; assigns a sequence
    /// number and broadcasts to all current subscribers.
    pub async fn publish(&self, category: EventCategory, severity: EventSeverity, payload: EventPayload) {
        let mut event = UnifiedEvent::new(category, severity, payload);
        event.sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        if event.correlation_id.is_none() {
            event.correlation_id = *self.correlation_context.read().await;
        }
        if self.sender.send(event).is_err() {
            // No subscribers currently listening; not an error condition.
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnifiedEvent> {
        self.sender.subscribe()
    }

    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    pub async fn start_correlation(&self) -> Uuid {
        let id = Uuid::new_v4();
        *self.correlation_context.write().await = Some(id);
        id
    }

    pub async fn end_correlation(&self) {
        *self.correlation_context.write().await = None;
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Wait for a specific task to reach a terminal event, without busy-spinning,
/// bounded by an absolute deadline. Used by the Hive and Workflow
/// orchestrators to implement dependency waits.
pub async fn wait_for_task_completion(
    bus: &EventBus,
    task_id: Uuid,
    deadline: tokio::time::Instant,
) -> Option<bool> {
    let mut rx = bus.subscribe();
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => match event.payload {
                EventPayload::TaskCompleted { task_id: id, .. } if id == task_id => return Some(true),
                EventPayload::TaskFailed { task_id: id, .. } if id == task_id => return Some(false),
                _ => continue,
            },
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!(skipped, "event bus subscriber lagged while waiting for task completion");
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_assigns_increasing_sequence_numbers() {
        let bus = EventBus::new(EventBusConfig::default());
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();
        bus.publish(EventCategory::Task, EventSeverity::Info, EventPayload::TaskSubmitted { task_id }).await;
        bus.publish(EventCategory::Task, EventSeverity::Info, EventPayload::TaskStarted { task_id }).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.sequence.0 > first.sequence.0);
    }

    #[tokio::test]
    async fn topic_name_uses_category_colon_action_shape() {
        let payload = EventPayload::WorkStealingStolen {
            task_id: Uuid::new_v4(),
            from_agent: Uuid::new_v4(),
            to_agent: Uuid::new_v4(),
        };
        assert_eq!(payload.topic(), "work_stealing:stolen");
    }

    #[tokio::test]
    async fn wait_for_task_completion_resolves_on_matching_event() {
        let bus = EventBus::new(EventBusConfig::default());
        let task_id = Uuid::new_v4();
        let bus_clone_sender = bus.sender.clone();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(500);

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let mut event = UnifiedEvent::new(
                EventCategory::Task,
                EventSeverity::Info,
                EventPayload::TaskCompleted { task_id, result: serde_json::json!(null) },
            );
            event.sequence = SequenceNumber(1);
            let _ = bus_clone_sender.send(event);
        });

        let outcome = wait_for_task_completion(&bus, task_id, deadline).await;
        assert_eq!(outcome, Some(true));
    }
}
