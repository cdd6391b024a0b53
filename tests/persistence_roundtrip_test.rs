//! Testable property #10: an executor's queue survives a shutdown/restart
//! cycle when persistence is enabled — tasks still pending at shutdown are
//! recovered into the queue of a freshly constructed executor pointed at
//! the same directory.

use std::sync::Arc;

use coordination_runtime::domain::models::{BackgroundTaskKind, BackgroundTaskOptions, TaskPriority};
use coordination_runtime::services::{EventBus, EventBusConfig};
use coordination_runtime::services::background_executor::{BackgroundExecutor, BackgroundExecutorConfig};

#[tokio::test]
async fn queued_tasks_survive_shutdown_and_restart() {
    let dir = tempfile::tempdir().unwrap();

    let config = BackgroundExecutorConfig {
        max_concurrent_tasks: 0, // nothing runs; everything stays queued
        enable_persistence: true,
        persistence_dir: Some(dir.path().to_path_buf()),
        ..BackgroundExecutorConfig::default()
    };
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let executor = BackgroundExecutor::new(config.clone(), Arc::clone(&event_bus));
    executor.initialize().await;

    let options = BackgroundTaskOptions { priority: TaskPriority::High, ..Default::default() };
    let submitted = executor
        .submit(BackgroundTaskKind::Script, "true".to_string(), vec![], options)
        .await
        .unwrap();

    executor.shutdown().await;

    let restarted = BackgroundExecutor::new(config, Arc::clone(&event_bus));
    restarted.initialize().await;

    let recovered = restarted.get_task(submitted).await;
    assert!(recovered.is_some(), "submitted task should have been recovered from disk");

    let metrics = restarted.metrics().await;
    assert!(metrics.queued_tasks >= 1);
}
