//! The task registry: entities, dependency edges, status transitions,
//! readiness, cycle detection, and the group/resource indexes.
//!
//! The graph owns every task. Accessors return clones; status
//! transitions are linearizable per task under the graph lock, but
//! there is no transaction spanning multiple tasks.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::AgentId;
use crate::coordination::bus::MessageBus;
use crate::coordination::message::MessageType;
use crate::core::task::{
    CoordinatedTask, DependencyKind, Priority, TaskDependency, TaskId, TaskStatus,
};
use crate::qlog_debug;

#[derive(Default)]
struct GraphState {
    tasks: HashMap<TaskId, CoordinatedTask>,
    /// coordination_group -> member task ids.
    groups: HashMap<String, Vec<TaskId>>,
    /// resource_id -> task ids declaring that resource.
    resource_usage: HashMap<String, Vec<TaskId>>,
}

/// Snapshot of graph shape and progress.
#[derive(Debug, Clone, Serialize)]
pub struct GraphMetrics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub coordination_group_count: usize,
    pub total_dependency_edges: usize,
    pub avg_dependencies_per_task: f64,
}

/// Dependency-aware task registry.
pub struct TaskGraph {
    state: Mutex<GraphState>,
    bus: Arc<MessageBus>,
}

impl TaskGraph {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            bus,
        }
    }

    /// Register a task and index its group and resource declarations.
    pub async fn add_task(&self, task: CoordinatedTask) -> TaskId {
        let id = task.task_id;
        let mut state = self.state.lock().await;
        if let Some(group) = &task.coordination_group {
            state.groups.entry(group.clone()).or_default().push(id);
        }
        for resource in &task.resource_requirements {
            state
                .resource_usage
                .entry(resource.clone())
                .or_default()
                .push(id);
        }
        qlog_debug!("graph: add task {} '{}'", id.short(), task.name);
        state.tasks.insert(id, task);
        id
    }

    /// A copy of the task, if registered.
    pub async fn get_task(&self, id: TaskId) -> Option<CoordinatedTask> {
        self.state.lock().await.tasks.get(&id).cloned()
    }

    /// Copies of every registered task.
    pub async fn all_tasks(&self) -> Vec<CoordinatedTask> {
        self.state.lock().await.tasks.values().cloned().collect()
    }

    /// Set a task's status directly. Fails for unknown tasks and for
    /// tasks already in a terminal state. Cancellation is reachable
    /// from any non-terminal state through this call.
    pub async fn update_status(&self, id: TaskId, status: TaskStatus) -> bool {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        if task.status.is_terminal() {
            return false;
        }
        qlog_debug!("graph: {} {} -> {}", id.short(), task.status, status);
        task.status = status;
        task.touch();
        true
    }

    /// Pending -> Assigned, recording the owner.
    pub async fn assign(&self, id: TaskId, agent: &AgentId) -> bool {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }
        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some(agent.clone());
        task.touch();
        true
    }

    /// Assigned -> InProgress.
    pub async fn start(&self, id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        if task.status != TaskStatus::Assigned {
            return false;
        }
        task.status = TaskStatus::InProgress;
        task.touch();
        true
    }

    /// InProgress -> Completed. Notifies the assigned agent of every
    /// dependent task that one of its dependencies finished.
    pub async fn complete(&self, id: TaskId) -> bool {
        // Collect notification targets under the lock, send after.
        let notifications = {
            let mut state = self.state.lock().await;
            let Some(task) = state.tasks.get_mut(&id) else {
                return false;
            };
            if task.status != TaskStatus::InProgress {
                return false;
            }
            task.status = TaskStatus::Completed;
            task.touch();
            let completed_name = task.name.clone();
            let dependents = task.dependents.clone();

            dependents
                .into_iter()
                .filter_map(|dep_id| {
                    let dependent = state.tasks.get(&dep_id)?;
                    let agent = dependent.assigned_agent.clone()?;
                    Some((agent, dep_id, completed_name.clone()))
                })
                .collect::<Vec<_>>()
        };

        for (agent, dependent_id, completed_name) in notifications {
            self.bus
                .send(
                    AgentId::from("task_graph"),
                    agent,
                    MessageType::Notification,
                    serde_json::json!({
                        "event": "dependency_completed",
                        "completed_task": id,
                        "completed_task_name": completed_name,
                        "dependent_task": dependent_id,
                    }),
                    Priority::Medium,
                )
                .await;
        }
        true
    }

    /// Assigned or InProgress -> Failed.
    pub async fn fail(&self, id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
            return false;
        }
        task.status = TaskStatus::Failed;
        task.touch();
        true
    }

    /// Add a dependency edge: `task_id` depends on `dependency_id`.
    /// Maintains the dependent back-reference on the other task in the
    /// same critical section. Fails if either task is unknown. Does
    /// not reject cycle-creating edges; cycles surface later through
    /// `detect_cycles`.
    pub async fn add_dependency(
        &self,
        task_id: TaskId,
        dependency_id: TaskId,
        kind: DependencyKind,
        description: &str,
    ) -> bool {
        let mut state = self.state.lock().await;
        if !state.tasks.contains_key(&task_id) || !state.tasks.contains_key(&dependency_id) {
            return false;
        }

        let task = state
            .tasks
            .get_mut(&task_id)
            .filter(|t| !t.dependencies.iter().any(|d| d.task_id == dependency_id));
        let Some(task) = task else {
            // Edge already present; keep the invariant, report success.
            return true;
        };
        task.dependencies
            .push(TaskDependency::new(dependency_id, kind, description));
        task.touch();

        if let Some(dependency) = state.tasks.get_mut(&dependency_id) {
            dependency.dependents.push(task_id);
            dependency.touch();
        }
        qlog_debug!(
            "graph: {} depends on {} ({:?})",
            task_id.short(),
            dependency_id.short(),
            kind
        );
        true
    }

    /// Pending tasks whose Hard dependencies are all Completed or
    /// Cancelled.
    pub async fn ready_tasks(&self) -> Vec<CoordinatedTask> {
        let state = self.state.lock().await;
        let statuses: HashMap<TaskId, TaskStatus> =
            state.tasks.iter().map(|(id, t)| (*id, t.status)).collect();
        state
            .tasks
            .values()
            .filter(|t| t.can_start(&statuses))
            .cloned()
            .collect()
    }

    pub async fn by_status(&self, status: TaskStatus) -> Vec<CoordinatedTask> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    pub async fn by_agent(&self, agent: &AgentId) -> Vec<CoordinatedTask> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|t| t.assigned_agent.as_ref() == Some(agent))
            .cloned()
            .collect()
    }

    pub async fn by_resource(&self, resource_id: &str) -> Vec<CoordinatedTask> {
        let state = self.state.lock().await;
        state
            .resource_usage
            .get(resource_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn by_group(&self, group: &str) -> Vec<CoordinatedTask> {
        let state = self.state.lock().await;
        state
            .groups
            .get(group)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Find dependency cycles by depth-first traversal over every
    /// dependency edge (all kinds). Each cycle is reported as the
    /// recursion-stack slice from the revisited node onward. Every
    /// task is tried as a root so cycles in disconnected components
    /// are found too.
    pub async fn detect_cycles(&self) -> Vec<Vec<TaskId>> {
        let state = self.state.lock().await;
        let edges: HashMap<TaskId, Vec<TaskId>> = state
            .tasks
            .iter()
            .map(|(id, t)| (*id, t.dependencies.iter().map(|d| d.task_id).collect()))
            .collect();
        drop(state);

        let mut cycles = Vec::new();
        let mut visited: HashSet<TaskId> = HashSet::new();

        // Deterministic root order keeps cycle reports stable.
        let mut roots: Vec<TaskId> = edges.keys().copied().collect();
        roots.sort_by_key(|id| id.0);

        for root in roots {
            if visited.contains(&root) {
                continue;
            }
            let mut path: Vec<TaskId> = Vec::new();
            let mut on_stack: HashSet<TaskId> = HashSet::new();
            Self::dfs(root, &edges, &mut visited, &mut path, &mut on_stack, &mut cycles);
        }
        cycles
    }

    fn dfs(
        node: TaskId,
        edges: &HashMap<TaskId, Vec<TaskId>>,
        visited: &mut HashSet<TaskId>,
        path: &mut Vec<TaskId>,
        on_stack: &mut HashSet<TaskId>,
        cycles: &mut Vec<Vec<TaskId>>,
    ) {
        visited.insert(node);
        on_stack.insert(node);
        path.push(node);

        if let Some(neighbors) = edges.get(&node) {
            for &next in neighbors {
                if on_stack.contains(&next) {
                    // Back-edge: the cycle is the stack from `next` onward.
                    if let Some(pos) = path.iter().position(|&id| id == next) {
                        cycles.push(path[pos..].to_vec());
                    }
                } else if !visited.contains(&next) {
                    Self::dfs(next, edges, visited, path, on_stack, cycles);
                }
            }
        }

        path.pop();
        on_stack.remove(&node);
    }

    pub async fn metrics(&self) -> GraphMetrics {
        let state = self.state.lock().await;
        let total = state.tasks.len();
        let count =
            |s: TaskStatus| state.tasks.values().filter(|t| t.status == s).count();
        let total_dependency_edges: usize =
            state.tasks.values().map(|t| t.dependencies.len()).sum();
        GraphMetrics {
            total,
            pending: count(TaskStatus::Pending),
            in_progress: count(TaskStatus::InProgress),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            coordination_group_count: state.groups.len(),
            total_dependency_edges,
            avg_dependencies_per_task: if total == 0 {
                0.0
            } else {
                total_dependency_edges as f64 / total as f64
            },
        }
    }
}
