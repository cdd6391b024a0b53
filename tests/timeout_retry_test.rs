//! S4 from the coordination runtime's end-to-end scenarios: a task that
//! blows its timeout is retried once per its policy, times out again, and
//! lands in a terminal `timeout` status with `retryCount` incremented.

use std::sync::Arc;
use std::time::Duration;

use coordination_runtime::domain::models::{BackgroundTaskKind, BackgroundTaskOptions, TaskStatus};
use coordination_runtime::services::event_bus::{EventBus, EventBusConfig};
use coordination_runtime::services::background_executor::{BackgroundExecutor, BackgroundExecutorConfig};

#[tokio::test]
async fn s4_timed_out_task_retries_once_then_stays_timed_out() {
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let config = BackgroundExecutorConfig {
        max_concurrent_tasks: 1,
        retry_backoff_base_secs: 0,
        kill_grace_ms: 10,
        ..BackgroundExecutorConfig::default()
    };
    let executor = BackgroundExecutor::new(config, event_bus);
    executor.initialize().await;

    let options = BackgroundTaskOptions { timeout_ms: Some(100), retries: 1, ..Default::default() };
    let id = executor
        .submit(BackgroundTaskKind::Script, "bash".into(), vec!["-c".into(), "sleep 10".into()], options)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = executor.get_task(id).await.unwrap();
        if task.status.is_terminal() {
            assert_eq!(task.status, TaskStatus::Timeout);
            assert_eq!(task.retry_count, 1);
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("task never reached a terminal status");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
