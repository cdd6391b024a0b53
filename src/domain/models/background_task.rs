//! Background task domain model (`services::background_executor`).
//!
//! Status lifecycle is identical to `Task`'s; the type is kept separate
//! because a background task additionally carries subprocess bookkeeping
//! (`pid`, captured stdio) that a coordination `Task` never does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::task::{TaskPriority, TaskStatus};
use crate::domain::error::TaskFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundTaskKind {
    Process,
    ClaudeSpawn,
    Script,
    Workflow,
    AgentTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTaskOptions {
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub detached: bool,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Default for BackgroundTaskOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: HashMap::new(),
            timeout_ms: None,
            retries: 0,
            detached: false,
            priority: TaskPriority::default(),
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: Uuid,
    pub kind: BackgroundTaskKind,
    pub command: String,
    pub args: Vec<String>,
    pub options: BackgroundTaskOptions,
    pub status: TaskStatus,
    pub pid: Option<u32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskFailure>,
    pub retry_count: u32,
    pub queue_time_ms: Option<i64>,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BackgroundTask {
    pub fn new(kind: BackgroundTaskKind, command: impl Into<String>, args: Vec<String>, options: BackgroundTaskOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            command: command.into(),
            args,
            options,
            status: TaskStatus::Created,
            pid: None,
            stdout: None,
            stderr: None,
            result: None,
            error: None,
            retry_count: 0,
            queue_time_ms: None,
            execution_time_ms: None,
            created_at: now,
            updated_at: now,
            start_time: None,
            end_time: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
