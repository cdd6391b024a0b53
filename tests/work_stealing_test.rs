//! S5 from the coordination runtime's end-to-end scenarios: an overloaded
//! agent's backlog is rebalanced onto an idle one by the steal pass.

use std::sync::Arc;

use coordination_runtime::domain::models::{Agent, CapabilitySet, Task};
use coordination_runtime::services::dependency_graph::DependencyGraph;
use coordination_runtime::services::{AgentRegistry, EventBus, EventBusConfig, Scheduler, SchedulerConfig};
use tokio::sync::Mutex;

#[tokio::test]
async fn s5_overloaded_agent_sheds_work_to_idle_agent() {
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let registry = Arc::new(AgentRegistry::new(Arc::clone(&event_bus)));
    let graph = Arc::new(Mutex::new(DependencyGraph::new()));

    let busy = Agent::new("worker", CapabilitySet::CODING, 10);
    let busy_id = registry.register(busy).await;
    let idle = Agent::new("worker", CapabilitySet::CODING, 10);
    let idle_id = registry.register(idle).await;

    let config = SchedulerConfig { steal_threshold: 3, max_steal_batch: 2, ..SchedulerConfig::default() };
    let scheduler = Scheduler::new(config, Arc::clone(&registry), Arc::clone(&graph), Arc::clone(&event_bus));

    // Pin every task directly to the busy agent so the imbalance is
    // entirely artificial, not a side effect of scheduling strategy.
    for _ in 0..5 {
        let task = Task::new("build", "compile a crate");
        scheduler.assign_task(task, Some(busy_id), None).await.unwrap();
    }

    assert_eq!(scheduler.pending_count(busy_id).await, 5);
    assert_eq!(scheduler.pending_count(idle_id).await, 0);

    scheduler.run_steal_pass().await;

    let idle_after = scheduler.pending_count(idle_id).await;
    let busy_after = scheduler.pending_count(busy_id).await;
    assert!(idle_after >= 2, "expected at least 2 stolen tasks, got {idle_after}");
    assert_eq!(busy_after + idle_after, 5);
}
