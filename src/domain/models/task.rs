//! Task domain model.
//!
//! A task is an abstract unit of work routed through the coordination
//! runtime: queued, assigned to an agent, executed, and driven to exactly
//! one terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Priority level for a task, with a fixed integer order (critical highest).
///
/// The source this runtime was distilled from sometimes represented
/// priority as a string and sometimes as an integer; this is the single
/// canonical representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Background = 1,
    Low = 2,
    Normal = 3,
    High = 4,
    Critical = 5,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            "background" => Some(Self::Background),
            _ => None,
        }
    }

    /// Integer rank used for ordering; higher sorts first.
    pub fn rank(&self) -> i32 {
        *self as i32
    }
}

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    /// Terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout)
    }
}

/// A fixed vocabulary of agent capabilities, represented as a small bitmap
/// rather than an open-ended string map (per the design note against
/// dynamic capability maps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(u32);

macro_rules! capability_bits {
    ($($name:ident = $bit:expr),* $(,)?) => {
        impl CapabilitySet {
            $(pub const $name: CapabilitySet = CapabilitySet(1 << $bit);)*

            pub const ALL_NAMES: &'static [(&'static str, CapabilitySet)] = &[
                $((stringify!($name), CapabilitySet(1 << $bit)),)*
            ];
        }
    };
}

capability_bits! {
    CODING = 0,
    ANALYSIS = 1,
    REVIEW = 2,
    COORDINATION = 3,
    TESTING = 4,
    RESEARCH = 5,
    DOCUMENTATION = 6,
    DEPLOYMENT = 7,
}

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Fraction of `required`'s bits that are present in `self`, in [0, 1].
    pub fn coverage(&self, required: Self) -> f64 {
        if required.0 == 0 {
            return 1.0;
        }
        let covered = (self.0 & required.0).count_ones();
        let needed = required.0.count_ones();
        f64::from(covered) / f64::from(needed)
    }

    pub fn from_names(names: &[&str]) -> Self {
        let mut set = Self::empty();
        for name in names {
            if let Some((_, bit)) = Self::ALL_NAMES.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                set = set.union(*bit);
            }
        }
        set
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Requirements a task declares of whatever agent executes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequirements {
    pub capabilities: CapabilitySet,
    pub tools: HashSet<String>,
    pub permissions: HashSet<String>,
}

/// Dependency and conflict constraints declared on a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConstraints {
    pub dependencies: HashSet<Uuid>,
    pub dependents: HashSet<Uuid>,
    pub conflicts: HashSet<Uuid>,
    pub timeout_ms: Option<u64>,
}

/// One attempt at executing a task (one per retry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub attempt: u32,
    pub agent_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// One entry in a task's append-only status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// The outcome of a completed task, as returned by whatever executed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub output: serde_json::Value,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// A unit of work routed through the coordination runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Free-form type taxonomy: "coding", "analysis", "review", "coordination", ...
    pub task_type: String,
    pub priority: TaskPriority,
    pub requirements: TaskRequirements,
    pub constraints: TaskConstraints,
    pub status: TaskStatus,
    pub input: serde_json::Value,
    pub instructions: String,
    pub context: serde_json::Value,
    pub attempts: Vec<TaskAttempt>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub result: Option<crate::domain::error::TaskFailure>,
    pub error: Option<crate::domain::error::TaskFailure>,
    pub assigned_agent: Option<Uuid>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, instructions: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            priority: TaskPriority::default(),
            requirements: TaskRequirements::default(),
            constraints: TaskConstraints::default(),
            status: TaskStatus::Created,
            input: serde_json::Value::Null,
            instructions: instructions.into(),
            context: serde_json::Value::Null,
            attempts: Vec::new(),
            status_history: vec![StatusHistoryEntry { status: TaskStatus::Created, at: now, note: None }],
            result: None,
            error: None,
            assigned_agent: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = Uuid>) -> Self {
        self.constraints.dependencies = dependencies.into_iter().collect();
        self
    }

    /// Append-only transition. Does not validate the transition graph itself
    /// (owning components enforce that); records the history entry and
    /// bumps `updated_at`.
    pub fn transition(&mut self, status: TaskStatus, note: Option<String>) {
        self.status = status;
        self.updated_at = Utc::now();
        self.status_history.push(StatusHistoryEntry { status, at: self.updated_at, note });
    }
}
