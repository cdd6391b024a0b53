//! S6 from the coordination runtime's end-to-end scenarios: a fork-join
//! workflow runs its two branches in parallel and only starts the join
//! once both have completed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;

use coordination_runtime::domain::models::{
    Agent, CapabilitySet, Workflow, WorkflowStrategy, WorkflowTask,
};
use coordination_runtime::services::agent_registry::AgentRegistry;
use coordination_runtime::services::background_executor::{BackgroundExecutor, BackgroundExecutorConfig};
use coordination_runtime::services::dependency_graph::DependencyGraph;
use coordination_runtime::services::event_bus::{EventBus, EventBusConfig};
use coordination_runtime::services::hive_orchestrator::{HiveConfig, HiveOrchestrator};
use coordination_runtime::services::load_balancer::{LoadBalancer, LoadBalancerConfig};
use coordination_runtime::services::scheduler::{Scheduler, SchedulerConfig};
use coordination_runtime::services::{WorkflowOrchestrator, WorkflowOrchestratorConfig};

async fn harness() -> Arc<WorkflowOrchestrator> {
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
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

#[tokio::test]
async fn s6_join_waits_for_both_fork_branches() {
    let orchestrator = harness().await;

    let f1 = WorkflowTask::atomic("f1", json!({"command": "bash", "args": ["-c", "echo branch-one"]}));
    let f2 = WorkflowTask::atomic("f2", json!({"command": "bash", "args": ["-c", "echo branch-two"]}));
    let join = WorkflowTask::atomic("join", json!({"command": "bash", "args": ["-c", "echo joined"]}))
        .with_dependencies([f1.id, f2.id]);

    let wf = Workflow::new("fork-join", WorkflowStrategy::ForkJoin).with_tasks([f1, f2, join]);
    let execution_id = orchestrator.execute_workflow(wf).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let progress = orchestrator.progress(execution_id).await.unwrap();
        if progress.percentage >= 100.0 {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("fork-join workflow did not finish in time");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let progress = orchestrator.progress(execution_id).await.unwrap();
    assert_eq!(progress.percentage, 100.0);
}
