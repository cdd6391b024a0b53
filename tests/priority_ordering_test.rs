//! Testable property #11: with a single execution slot, tasks queued while
//! one is already running are dispatched in priority order, not submission
//! order.

use std::sync::Arc;
use std::time::Duration;

use coordination_runtime::domain::models::{BackgroundTaskKind, BackgroundTaskOptions, TaskPriority};
use coordination_runtime::services::event_bus::{EventBus, EventBusConfig, EventPayload};
use coordination_runtime::services::background_executor::{BackgroundExecutor, BackgroundExecutorConfig};

#[tokio::test]
async fn higher_priority_task_dispatched_before_lower_priority_one() {
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let config = BackgroundExecutorConfig { max_concurrent_tasks: 1, ..BackgroundExecutorConfig::default() };
    let executor = BackgroundExecutor::new(config, Arc::clone(&event_bus));
    executor.initialize().await;

    let mut started_order = event_bus.subscribe();

    let low_opts = BackgroundTaskOptions { priority: TaskPriority::Low, ..Default::default() };
    let first = executor
        .submit(BackgroundTaskKind::Script, "bash".into(), vec!["-c".into(), "sleep 0.2".into()], low_opts.clone())
        .await
        .unwrap();

    // Give the pump a moment to pick up `first` as the sole running slot
    // fills, then queue two more behind it while it sleeps.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let low = executor
        .submit(BackgroundTaskKind::Script, "bash".into(), vec!["-c".into(), "true".into()], low_opts)
        .await
        .unwrap();
    let high_opts = BackgroundTaskOptions { priority: TaskPriority::High, ..Default::default() };
    let high = executor
        .submit(BackgroundTaskKind::Script, "bash".into(), vec!["-c".into(), "true".into()], high_opts)
        .await
        .unwrap();

    let mut completion_order = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while completion_order.len() < 3 {
        if tokio::time::Instant::now() > deadline {
            panic!("tasks did not complete in time");
        }
        if let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), started_order.recv()).await {
            if let EventPayload::TaskCompleted { task_id, .. } = event.payload {
                if [first, low, high].contains(&task_id) {
                    completion_order.push(task_id);
                }
            }
        }
    }

    assert_eq!(completion_order[0], first, "the already-running task finishes first regardless of priority");
    assert_eq!(completion_order[1], high, "high priority must be dispatched ahead of low once a slot frees up");
    assert_eq!(completion_order[2], low);
}
