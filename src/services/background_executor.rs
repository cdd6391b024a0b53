//! Background executor: queue submitted work by priority, run it as an OS
//! subprocess, enforce timeouts, retry with backoff, and persist state
//! across restarts.
//!
//! Process spawn/kill follows the pattern in
//! `adapters/substrates/claude_code.rs` (`tokio::process::Command`,
//! captured stdio, signal escalation via `nix`), with the instrumentation
//! density of `dag_executor.rs`; the allow-list gate lives in
//! `services::command_safety`. What used to be two overlapping background
//! execution paths (`dag_executor` and `task_queue_service`) are unified
//! here into a single submit/queue/run/retry/persist contract.

use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{ExecutorError, TaskFailure};
use crate::domain::models::{
    BackgroundTask, BackgroundTaskKind, BackgroundTaskOptions, TaskPriority, TaskQueue, TaskStatus,
};
use crate::services::command_safety;
use crate::services::event_bus::{EventBus, EventCategory, EventPayload, EventSeverity};

#[derive(Debug, Clone)]
pub struct BackgroundExecutorConfig {
    pub max_concurrent_tasks: usize,
    pub max_queue_size: usize,
    pub default_timeout_ms: u64,
    pub retry_backoff_base_secs: u64,
    pub retry_backoff_max_secs: u64,
    pub kill_grace_ms: u64,
    pub stuck_multiplier: f64,
    pub retention_window_secs: i64,
    pub enable_persistence: bool,
    pub persistence_dir: Option<PathBuf>,
}

impl Default for BackgroundExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            max_queue_size: 1000,
            default_timeout_ms: 30_000,
            retry_backoff_base_secs: 2,
            retry_backoff_max_secs: 60,
            kill_grace_ms: 1_000,
            stuck_multiplier: 1.5,
            retention_window_secs: 3_600,
            enable_persistence: false,
            persistence_dir: None,
        }
    }
}

/// `{totalTasks, completedTasks, failedTasks, runningTasks, queuedTasks,
/// averageExecutionTime, successRate, throughput, resourceUsage}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutorMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub running_tasks: usize,
    pub queued_tasks: usize,
    pub average_execution_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Default)]
struct MetricsState {
    total_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    total_execution_time_ms: AtomicU64,
}

/// Persisted on-disk shape: `{tasks, taskQueue, metrics, timestamp}`.
#[derive(Serialize, Deserialize)]
struct PersistedState {
    tasks: Vec<BackgroundTask>,
    task_queue: Vec<Uuid>,
    metrics: ExecutorMetrics,
    timestamp: chrono::DateTime<Utc>,
}

struct RunningHandle {
    pid: Option<u32>,
    cancelled: Arc<AtomicBool>,
    detached: bool,
}

/// Accepts submitted work, queues it by priority, executes it as a
/// subprocess, and drives it to exactly one terminal status.
pub struct BackgroundExecutor {
    config: BackgroundExecutorConfig,
    event_bus: Arc<EventBus>,
    tasks: RwLock<HashMap<Uuid, BackgroundTask>>,
    queue: Mutex<TaskQueue<Uuid>>,
    running: RwLock<HashMap<Uuid, RunningHandle>>,
    metrics: MetricsState,
    shutting_down: AtomicBool,
    pump_notify: Notify,
}

impl BackgroundExecutor {
    pub fn new(config: BackgroundExecutorConfig, event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            config,
            event_bus,
            tasks: RwLock::new(HashMap::new()),
            queue: Mutex::new(TaskQueue::new()),
            running: RwLock::new(HashMap::new()),
            metrics: MetricsState::default(),
            shutting_down: AtomicBool::new(false),
            pump_notify: Notify::new(),
        })
    }

    /// Load persisted state (if enabled), demoting any task observed
    /// `running` back to `pending`-equivalent `Queued` with its `pid`/
    /// `startTime` cleared, then re-enqueueing it.
    #[instrument(skip(self))]
    pub async fn initialize(self: &Arc<Self>) {
        if self.config.enable_persistence {
            if let Some(dir) = &self.config.persistence_dir {
                if let Err(e) = self.recover_from_disk(dir).await {
                    warn!(error = %e, "background executor persistence recovery failed");
                }
            }
        }
        self.spawn_pump_loop();
    }

    async fn recover_from_disk(self: &Arc<Self>, dir: &std::path::Path) -> Result<(), ExecutorError> {
        let path = dir.join("executor-state.json");
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ExecutorError::PersistenceFailed(e.to_string())),
        };
        let state: PersistedState =
            serde_json::from_slice(&bytes).map_err(|e| ExecutorError::PersistenceFailed(e.to_string()))?;

        let mut tasks = self.tasks.write().await;
        let mut queue = self.queue.lock().await;
        for mut task in state.tasks {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Queued;
                task.pid = None;
                task.start_time = None;
                task.touch();
                queue.enqueue(task.id, priority_rank(task.options.priority));
            }
            tasks.insert(task.id, task);
        }
        for id in state.task_queue {
            if tasks.contains_key(&id) && !queue.iter().any(|q| *q == id) {
                let priority = tasks.get(&id).map(|t| t.options.priority).unwrap_or_default();
                queue.enqueue(id, priority_rank(priority));
            }
        }
        info!(recovered = tasks.len(), "background executor recovered persisted state");
        Ok(())
    }

    /// Submit a unit of work; returns its opaque id. Fails with
    /// `QueueFull` at capacity, or with the allow-list/argument-scanner
    /// errors before anything is queued.
    #[instrument(skip(self, args, options))]
    pub async fn submit(
        self: &Arc<Self>,
        kind: BackgroundTaskKind,
        command: String,
        args: Vec<String>,
        options: BackgroundTaskOptions,
    ) -> Result<Uuid, ExecutorError> {
        command_safety::check_command_allowed(&command)?;
        command_safety::check_args_safe(&args)?;

        {
            let queue = self.queue.lock().await;
            if queue.len() >= self.config.max_queue_size {
                return Err(ExecutorError::QueueFull(queue.len()));
            }
        }

        let mut task = BackgroundTask::new(kind, command, args, options);
        task.status = TaskStatus::Queued;
        task.touch();
        let id = task.id;
        let priority = task.options.priority;

        self.tasks.write().await.insert(id, task.clone());
        self.queue.lock().await.enqueue(id, priority_rank(priority));
        self.metrics.total_tasks.fetch_add(1, Ordering::Relaxed);
        self.persist_task(&task).await;

        self.event_bus
            .publish(EventCategory::Task, EventSeverity::Info, EventPayload::TaskSubmitted { task_id: id })
            .await;
        self.pump_notify.notify_one();
        Ok(id)
    }

    /// Cancel a task: pending tasks are simply dequeued; running tasks
    /// receive SIGTERM followed by SIGKILL after the grace period.
    pub async fn cancel(self: &Arc<Self>, id: Uuid) -> Result<(), ExecutorError> {
        {
            let mut queue = self.queue.lock().await;
            let removed = queue.remove_matching(|queued_id| *queued_id == id);
            if !removed.is_empty() {
                let mut tasks = self.tasks.write().await;
                if let Some(task) = tasks.get_mut(&id) {
                    task.status = TaskStatus::Cancelled;
                    task.touch();
                }
                self.event_bus
                    .publish(EventCategory::Task, EventSeverity::Info, EventPayload::TaskCancelled { task_id: id })
                    .await;
                return Ok(());
            }
        }

        let running = self.running.read().await;
        let Some(handle) = running.get(&id) else {
            return Err(ExecutorError::NotFound(id));
        };
        handle.cancelled.store(true, Ordering::SeqCst);
        if let Some(pid) = handle.pid {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Option<BackgroundTask> {
        self.tasks.read().await.get(&id).cloned()
    }

    pub async fn metrics(&self) -> ExecutorMetrics {
        let completed = self.metrics.completed_tasks.load(Ordering::Relaxed);
        let failed = self.metrics.failed_tasks.load(Ordering::Relaxed);
        let total_time = self.metrics.total_execution_time_ms.load(Ordering::Relaxed);
        let terminal = completed + failed;
        ExecutorMetrics {
            total_tasks: self.metrics.total_tasks.load(Ordering::Relaxed),
            completed_tasks: completed,
            failed_tasks: failed,
            running_tasks: self.running.read().await.len(),
            queued_tasks: self.queue.lock().await.len(),
            average_execution_time_ms: if terminal > 0 { total_time as f64 / terminal as f64 } else { 0.0 },
            success_rate: if terminal > 0 { completed as f64 / terminal as f64 } else { 1.0 },
        }
    }

    /// Spawns the background loop that pumps the queue whenever capacity
    /// frees up, woken by `pump_notify` rather than busy-polling.
    fn spawn_pump_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if this.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                this.try_dispatch().await;
                tokio::select! {
                    () = this.pump_notify.notified() => {}
                    () = tokio::time::sleep(Duration::from_millis(200)) => {}
                }
            }
        });
    }

    async fn try_dispatch(self: &Arc<Self>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            if self.running.read().await.len() >= self.config.max_concurrent_tasks {
                return;
            }
            let next_id = {
                let mut queue = self.queue.lock().await;
                queue.dequeue()
            };
            let Some(id) = next_id else { return };
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_task(id).await });
        }
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn run_task(self: Arc<Self>, id: Uuid) {
        let Some(mut task) = self.tasks.read().await.get(&id).cloned() else {
            warn!(%id, "run_task invoked for unknown task");
            return;
        };
        if task.status == TaskStatus::Cancelled {
            return;
        }

        let now = Utc::now();
        task.status = TaskStatus::Running;
        task.start_time = Some(now);
        task.queue_time_ms = Some((now - task.created_at).num_milliseconds());
        task.touch();
        self.tasks.write().await.insert(id, task.clone());
        self.event_bus
            .publish(EventCategory::Task, EventSeverity::Info, EventPayload::TaskStarted { task_id: id })
            .await;

        let detached = task.options.detached;
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut cmd = Command::new(&task.command);
        cmd.args(&task.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if !detached {
            // Detached children must survive the runtime tearing down their
            // spawning task; kill_on_drop would SIGKILL them the moment this
            // Child handle is dropped.
            cmd.kill_on_drop(true);
        }
        if let Some(cwd) = &task.options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &task.options.env {
            cmd.env(key, value);
        }

        let spawned = cmd.spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.finish_failed(&mut task, ExecutorError::SpawnFailed(e.to_string())).await;
                return;
            }
        };
        let pid = child.id();
        self.running.write().await.insert(id, RunningHandle { pid, cancelled: Arc::clone(&cancelled), detached });
        task.pid = pid;
        self.tasks.write().await.insert(id, task.clone());

        // Drain stdout/stderr on their own tasks, concurrently with the
        // wait below, so a child writing past the pipe buffer never
        // deadlocks against a parent blocked in `wait()`.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut s) = stdout {
                let _ = s.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut s) = stderr {
                let _ = s.read_to_string(&mut buf).await;
            }
            buf
        });

        let timeout_ms = task.options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let timeout = Duration::from_millis(timeout_ms);
        let wait_result = tokio::time::timeout(timeout, child.wait()).await;

        self.running.write().await.remove(&id);

        if cancelled.load(Ordering::SeqCst) {
            self.escalate_kill(pid).await;
            task.stdout = Some(stdout_task.await.unwrap_or_default());
            task.stderr = Some(stderr_task.await.unwrap_or_default());
            task.status = TaskStatus::Cancelled;
            task.touch();
            self.tasks.write().await.insert(id, task.clone());
            self.persist_task(&task).await;
            return;
        }

        if wait_result.is_err() {
            // Timed out: kill first so the pipes close and the drain tasks
            // above actually resolve instead of waiting on a live child.
            self.escalate_kill(pid).await;
        }
        task.stdout = Some(stdout_task.await.unwrap_or_default());
        task.stderr = Some(stderr_task.await.unwrap_or_default());

        let end_time = Utc::now();
        task.end_time = Some(end_time);
        task.execution_time_ms = task.start_time.map(|s| (end_time - s).num_milliseconds());

        match wait_result {
            Ok(Ok(status)) if status.success() => {
                self.finish_completed(&mut task).await;
            }
            Ok(Ok(status)) => {
                let code = status.code().unwrap_or(-1);
                self.finish_failed(&mut task, ExecutorError::NonZeroExit(code)).await;
            }
            Ok(Err(e)) => {
                self.finish_failed(&mut task, ExecutorError::SpawnFailed(e.to_string())).await;
            }
            Err(_elapsed) => {
                self.finish_timeout(&mut task, timeout_ms).await;
            }
        }
    }

    /// SIGTERM, then SIGKILL after the configured grace period if the
    /// process has not yet exited.
    async fn escalate_kill(&self, pid: Option<u32>) {
        let Some(pid) = pid else { return };
        let nix_pid = Pid::from_raw(pid as i32);
        let _ = kill(nix_pid, Signal::SIGTERM);
        tokio::time::sleep(Duration::from_millis(self.config.kill_grace_ms)).await;
        let _ = kill(nix_pid, Signal::SIGKILL);
    }

    async fn finish_completed(&self, task: &mut BackgroundTask) {
        task.status = TaskStatus::Completed;
        task.touch();
        self.metrics.completed_tasks.fetch_add(1, Ordering::Relaxed);
        if let Some(ms) = task.execution_time_ms {
            self.metrics.total_execution_time_ms.fetch_add(ms.max(0) as u64, Ordering::Relaxed);
        }
        self.tasks.write().await.insert(task.id, task.clone());
        self.persist_task(task).await;
        self.event_bus
            .publish(
                EventCategory::Task,
                EventSeverity::Info,
                EventPayload::TaskCompleted { task_id: task.id, result: serde_json::json!({"stdout": task.stdout}) },
            )
            .await;
    }

    async fn finish_failed(&self, task: &mut BackgroundTask, err: ExecutorError) {
        if self.maybe_retry(task).await {
            return;
        }
        task.status = TaskStatus::Failed;
        task.error = Some(TaskFailure::from(&err));
        task.touch();
        self.metrics.failed_tasks.fetch_add(1, Ordering::Relaxed);
        self.tasks.write().await.insert(task.id, task.clone());
        self.persist_task(task).await;
        error!(task_id = %task.id, error = %err, "background task failed");
        self.event_bus
            .publish(EventCategory::Task, EventSeverity::Error, EventPayload::TaskFailed { task_id: task.id, error: err.to_string() })
            .await;
    }

    async fn finish_timeout(&self, task: &mut BackgroundTask, timeout_ms: u64) {
        let err = ExecutorError::Timeout(task.id, timeout_ms);
        if self.maybe_retry(task).await {
            return;
        }
        task.status = TaskStatus::Timeout;
        task.error = Some(TaskFailure::from(&err));
        task.touch();
        self.metrics.failed_tasks.fetch_add(1, Ordering::Relaxed);
        self.tasks.write().await.insert(task.id, task.clone());
        self.persist_task(task).await;
        self.event_bus
            .publish(EventCategory::Task, EventSeverity::Warning, EventPayload::TaskTimeout { task_id: task.id })
            .await;
    }

    /// Schedules a retry after `retryBackoffBase^retryCount` seconds,
    /// capped at `retryBackoffMax`. Returns `true` if a retry was scheduled
    /// (caller must not also mark the task terminal).
    async fn maybe_retry(self: &BackgroundExecutor, task: &mut BackgroundTask) -> bool {
        if task.retry_count >= task.options.retries {
            return false;
        }
        task.retry_count += 1;
        let backoff_secs = self
            .config
            .retry_backoff_base_secs
            .saturating_pow(task.retry_count)
            .min(self.config.retry_backoff_max_secs);
        task.status = TaskStatus::Queued;
        task.pid = None;
        task.start_time = None;
        task.touch();
        self.tasks.write().await.insert(task.id, task.clone());
        self.event_bus
            .publish(EventCategory::Task, EventSeverity::Info, EventPayload::TaskRetry { task_id: task.id, attempt: task.retry_count })
            .await;

        let this_tasks = self.tasks_handle();
        let queue = self.queue_handle();
        let notify = self.notify_handle();
        let id = task.id;
        let priority = task.options.priority;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            if this_tasks.read().await.contains_key(&id) {
                queue.lock().await.enqueue(id, priority_rank(priority));
                notify.notify_one();
            }
        });
        true
    }

    // Narrow accessors so `maybe_retry`'s spawned retry task doesn't need
    // to hold an `Arc<Self>` (it only runs against shared sub-state).
    fn tasks_handle(&self) -> &RwLock<HashMap<Uuid, BackgroundTask>> {
        &self.tasks
    }
    fn queue_handle(&self) -> &Mutex<TaskQueue<Uuid>> {
        &self.queue
    }
    fn notify_handle(&self) -> &Notify {
        &self.pump_notify
    }

    async fn persist_task(&self, task: &BackgroundTask) {
        if !self.config.enable_persistence {
            return;
        }
        let Some(dir) = &self.config.persistence_dir else { return };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, "failed to create persistence directory");
            return;
        }
        let path = dir.join(format!("{}.json", task.id));
        match serde_json::to_vec_pretty(task) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    warn!(error = %e, "failed to persist background task");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize background task"),
        }
    }

    /// Health sweep: force-cancel stuck `running` tasks and prune old
    /// terminal tasks past the retention window.
    pub async fn run_maintenance_sweep(self: &Arc<Self>) {
        let now = Utc::now();
        let stuck_ids: Vec<Uuid> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .filter(|t| {
                    t.start_time
                        .map(|s| {
                            let timeout_ms = t.options.timeout_ms.unwrap_or(self.config.default_timeout_ms) as f64;
                            (now - s).num_milliseconds() as f64 > timeout_ms * self.config.stuck_multiplier
                        })
                        .unwrap_or(false)
                })
                .map(|t| t.id)
                .collect()
        };
        for id in stuck_ids {
            warn!(%id, "force-cancelling stuck background task");
            let _ = self.cancel(id).await;
        }

        let mut tasks = self.tasks.write().await;
        tasks.retain(|_, t| {
            if !t.status.is_terminal() {
                return true;
            }
            t.end_time.map(|e| (now - e).num_seconds() < self.config.retention_window_secs).unwrap_or(true)
        });
    }

    /// Write the aggregate `executor-state.json` snapshot.
    async fn write_aggregate_snapshot(&self) {
        if !self.config.enable_persistence {
            return;
        }
        let Some(dir) = &self.config.persistence_dir else { return };
        let tasks: Vec<BackgroundTask> = self.tasks.read().await.values().cloned().collect();
        let task_queue: Vec<Uuid> = self.queue.lock().await.iter().copied().collect();
        let metrics = self.metrics().await;
        let state = PersistedState { tasks, task_queue, metrics, timestamp: Utc::now() };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(error = %e, "failed to create persistence directory");
            return;
        }
        match serde_json::to_vec_pretty(&state) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(dir.join("executor-state.json"), bytes).await {
                    warn!(error = %e, "failed to write aggregate executor snapshot");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize aggregate executor snapshot"),
        }
    }

    /// Stop accepting submissions, await in-flight processes to terminate,
    /// and persist final state. Idempotent.
    #[instrument(skip(self))]
    pub async fn shutdown(self: &Arc<Self>) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while tokio::time::Instant::now() < deadline {
            if self.running.read().await.values().all(|h| h.detached) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.write_aggregate_snapshot().await;
        self.event_bus.publish(EventCategory::System, EventSeverity::Info, EventPayload::SystemShutdown).await;
    }
}

fn priority_rank(priority: TaskPriority) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    {
        priority.rank() as u8
    }
}
