//! Testable property #12: shutdown waits for in-flight subprocesses to
//! finish before returning, rather than abandoning them mid-run.

use std::sync::Arc;

use coordination_runtime::domain::models::{BackgroundTaskKind, BackgroundTaskOptions};
use coordination_runtime::services::event_bus::{EventBus, EventBusConfig};
use coordination_runtime::services::background_executor::{BackgroundExecutor, BackgroundExecutorConfig};

#[tokio::test]
async fn shutdown_drains_running_tasks_before_returning() {
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let config = BackgroundExecutorConfig { max_concurrent_tasks: 1, ..BackgroundExecutorConfig::default() };
    let executor = BackgroundExecutor::new(config, event_bus);
    executor.initialize().await;

    let id = executor
        .submit(BackgroundTaskKind::Script, "bash".into(), vec!["-c".into(), "sleep 0.2".into()], BackgroundTaskOptions::default())
        .await
        .unwrap();

    // Let the pump pick it up before shutting down.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    executor.shutdown().await;

    let task = executor.get_task(id).await.unwrap();
    assert!(task.status.is_terminal(), "shutdown returned while the task was still {:?}", task.status);
}
