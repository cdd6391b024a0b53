//! Testable property #7: no more than `maxConcurrentTasks` subprocesses run
//! at once, even when the queue holds far more ready work.

use std::sync::Arc;
use std::time::Duration;

use coordination_runtime::domain::models::{BackgroundTaskKind, BackgroundTaskOptions};
use coordination_runtime::services::event_bus::{EventBus, EventBusConfig};
use coordination_runtime::services::background_executor::{BackgroundExecutor, BackgroundExecutorConfig};

#[tokio::test]
async fn running_count_never_exceeds_configured_cap() {
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let config = BackgroundExecutorConfig { max_concurrent_tasks: 2, max_queue_size: 20, ..BackgroundExecutorConfig::default() };
    let executor = BackgroundExecutor::new(config, event_bus);
    executor.initialize().await;

    for _ in 0..8 {
        executor
            .submit(BackgroundTaskKind::Script, "bash".into(), vec!["-c".into(), "sleep 0.1".into()], BackgroundTaskOptions::default())
            .await
            .unwrap();
    }

    let mut max_observed = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let metrics = executor.metrics().await;
        max_observed = max_observed.max(metrics.running_tasks);
        if metrics.completed_tasks as usize + metrics.failed_tasks as usize >= 8 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(max_observed <= 2, "observed {max_observed} concurrently running tasks, cap was 2");
    assert!(max_observed >= 1, "the executor never ran anything at all");
}
