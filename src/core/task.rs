//! Task data model.
//!
//! Tasks are created by the sequencer from a validated decomposition
//! request. Each task carries both the caller-supplied key and the
//! persisted id handed out by the task store. Tasks are never deleted,
//! only driven to a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task priority. Only `High` earns the scoring bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const VALUES: [&'static str; 3] = ["low", "medium", "high"];
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Created, waiting on dependencies or a worker.
    #[default]
    Pending,
    /// Dispatched to its assigned worker.
    Running,
    Completed,
    /// Terminal failure.
    Failed { reason: String },
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything the task store needs to persist a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Caller-supplied id from the decomposition request.
    pub key: String,
    pub description: String,
    pub task_type: String,
    /// Persisted ids of the tasks this one depends on.
    pub dependencies: Vec<TaskId>,
    pub required_capabilities: Vec<String>,
    pub priority: Priority,
    pub estimated_minutes: u32,
    pub parallel_group: Option<String>,
    pub can_run_in_parallel: bool,
}

/// A single unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub key: String,
    pub description: String,
    pub task_type: String,
    pub dependencies: Vec<TaskId>,
    pub required_capabilities: Vec<String>,
    pub priority: Priority,
    pub estimated_minutes: u32,
    pub parallel_group: Option<String>,
    pub can_run_in_parallel: bool,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Materialize a spec under a freshly generated id.
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self::with_id(TaskId::new(), spec)
    }

    pub fn with_id(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            key: spec.key,
            description: spec.description,
            task_type: spec.task_type,
            dependencies: spec.dependencies,
            required_capabilities: spec.required_capabilities,
            priority: spec.priority,
            estimated_minutes: spec.estimated_minutes,
            parallel_group: spec.parallel_group,
            can_run_in_parallel: spec.can_run_in_parallel,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: &str) {
        self.status = TaskStatus::Failed {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Return a running task to pending for a fresh attempt.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.started_at = None;
    }

    /// Check if the task is in a terminal state (Completed or Failed).
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. }
        )
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority == Priority::High
    }
}

#[cfg(test)]
pub(crate) fn test_spec(key: &str) -> TaskSpec {
    TaskSpec {
        key: key.to_string(),
        description: format!("{} description", key),
        task_type: "implementation".to_string(),
        dependencies: Vec::new(),
        required_capabilities: Vec::new(),
        priority: Priority::Medium,
        estimated_minutes: 10,
        parallel_group: None,
        can_run_in_parallel: false,
    }
}
