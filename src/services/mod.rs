//! Coordination services: the dependency graph, circuit breaker,
//! background executor, load balancer, scheduler, hive orchestrator, and
//! workflow orchestrator, plus the shared infrastructure (`event_bus`,
//! `command_safety`, `agent_registry`) they're all built on.

pub mod agent_registry;
pub mod background_executor;
pub mod circuit_breaker;
pub mod command_safety;
pub mod dependency_graph;
pub mod event_bus;
pub mod hive_orchestrator;
pub mod load_balancer;
pub mod scheduler;
pub mod workflow_orchestrator;

pub use agent_registry::AgentRegistry;
pub use background_executor::{BackgroundExecutor, BackgroundExecutorConfig, ExecutorMetrics};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState, CircuitStats};
pub use dependency_graph::DependencyGraph;
pub use event_bus::{
    EventBus, EventBusConfig, EventCategory, EventId, EventPayload, EventSeverity, SequenceNumber,
    UnifiedEvent,
};
pub use hive_orchestrator::{DecompositionStrategy, HiveConfig, HiveOrchestrator, Topology};
pub use load_balancer::{BalancingStrategy, LoadBalancer, LoadBalancerConfig};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulingStrategy};
pub use workflow_orchestrator::{WorkflowOrchestrator, WorkflowOrchestratorConfig};
