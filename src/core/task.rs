//! Task data model for the coordination graph.
//!
//! Tasks are the atomic units of work assigned to agents. Each task
//! tracks its status, assignment, priority, dependencies, coordination
//! group, and resource requirements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::agent::AgentId;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
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

/// Priority level for tasks and messages.
///
/// Derives `Ord` so that `Low < Medium < High < Critical`, which is
/// the ordering used everywhere comparisons happen (message dequeue,
/// preemption decisions, conflict resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// The next level up, saturating at Critical.
    pub fn bump(&self) -> Self {
        match self {
            Priority::Low => Priority::Medium,
            Priority::Medium => Priority::High,
            Priority::High => Priority::Critical,
            Priority::Critical => Priority::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task status in its coordination lifecycle.
///
/// Pending -> Assigned -> InProgress -> {Completed | Failed | Blocked | Cancelled}.
/// Blocked may return to InProgress once unblocked. Completed, Failed,
/// and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created but not yet assigned to an agent.
    Pending,
    /// Task assigned to an agent but not yet started.
    Assigned,
    /// Task is currently being executed by an agent.
    InProgress,
    /// Task completed successfully.
    Completed,
    /// Task failed.
    Failed,
    /// Task blocked, typically by conflict resolution.
    Blocked,
    /// Task cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a dependency edge.
///
/// Only Hard dependencies gate readiness. Soft and Coordinated edges
/// exist for notification and group-coordination semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Hard,
    Soft,
    Coordinated,
}

/// A single dependency edge: this task depends on `task_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// The task depended upon.
    pub task_id: TaskId,
    pub kind: DependencyKind,
    pub description: String,
}

impl TaskDependency {
    pub fn new(task_id: TaskId, kind: DependencyKind, description: &str) -> Self {
        Self {
            task_id,
            kind,
            description: description.to_string(),
        }
    }
}

/// A task registered with the coordination graph.
///
/// The graph owns the canonical copy; accessors hand out clones.
/// `dependents` is maintained as the inverse of other tasks'
/// `dependencies` whenever an edge is added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatedTask {
    /// Unique identifier for this task.
    pub task_id: TaskId,
    /// Human-readable name for the task.
    pub name: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// Current coordination status.
    pub status: TaskStatus,
    /// ID of the agent assigned to this task.
    pub assigned_agent: Option<AgentId>,
    /// Declared priority.
    pub priority: Priority,
    /// Opaque payload handed to the executing agent.
    pub payload: serde_json::Value,
    /// Tasks this task depends on.
    pub dependencies: Vec<TaskDependency>,
    /// Back-references: tasks that depend on this one.
    pub dependents: Vec<TaskId>,
    /// Optional label tying related tasks together.
    pub coordination_group: Option<String>,
    /// Named shared resources this task declares it needs.
    pub resource_requirements: Vec<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Opaque caller-defined annotations.
    pub metadata: serde_json::Value,
}

impl CoordinatedTask {
    /// Create a new task in Pending status with the given priority.
    pub fn new(name: &str, description: &str, payload: serde_json::Value, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::new(),
            name: name.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            assigned_agent: None,
            priority,
            payload,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            coordination_group: None,
            resource_requirements: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Builder-style: attach a coordination group label.
    pub fn with_group(mut self, group: &str) -> Self {
        self.coordination_group = Some(group.to_string());
        self
    }

    /// Builder-style: declare required resources.
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resource_requirements = resources;
        self
    }

    /// Record a mutation time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Iterator over the ids of Hard dependencies.
    pub fn hard_dependencies(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Hard)
            .map(|d| d.task_id)
    }

    /// Whether this task is ready to run given the statuses of the
    /// tasks it depends on. A Hard dependency is satisfied when it is
    /// Completed or Cancelled; a missing entry counts as unsatisfied.
    /// Cancelled is deliberately treated like Completed here: cancelling
    /// a dependency unblocks its dependents rather than cascading.
    pub fn can_start(&self, statuses: &HashMap<TaskId, TaskStatus>) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.hard_dependencies().all(|dep| {
            matches!(
                statuses.get(&dep),
                Some(TaskStatus::Completed) | Some(TaskStatus::Cancelled)
            )
        })
    }
}
