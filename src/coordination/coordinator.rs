//! The coordinator façade agents talk to.
//!
//! Wraps task creation, assignment, and lifecycle around the graph,
//! selects the next task for an agent under concurrency and resource
//! constraints, and drives group coordination and resource-yield
//! requests over the bus.

use serde::Serialize;
use std::sync::Arc;

use crate::agent::AgentId;
use crate::config::Config;
use crate::coordination::bus::{BusMetrics, MessageBus};
use crate::coordination::graph::{GraphMetrics, TaskGraph};
use crate::coordination::message::{MessageId, MessageType};
use crate::coordination::priority::PriorityManager;
use crate::core::task::{CoordinatedTask, DependencyKind, Priority, TaskId, TaskStatus};
use crate::qlog;

/// How contention over one resource was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ContentionOutcome {
    /// The holder was asked to yield; await its response.
    YieldRequested {
        resource_id: String,
        holder: AgentId,
        message_id: MessageId,
    },
    /// The holder has equal or higher priority; the task must wait.
    WaitRequired { resource_id: String, holder: AgentId },
}

/// Per-task report from `resolve_resource_conflicts`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceConflictReport {
    pub task_id: TaskId,
    pub contentions: Vec<ContentionOutcome>,
}

/// Combined read-only snapshot of coordination state.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinationStatus {
    pub graph: GraphMetrics,
    pub bus: BusMetrics,
}

pub struct TaskCoordinator {
    graph: Arc<TaskGraph>,
    bus: Arc<MessageBus>,
    priorities: Arc<PriorityManager>,
    max_tasks_per_agent: usize,
}

impl TaskCoordinator {
    pub fn new(
        graph: Arc<TaskGraph>,
        bus: Arc<MessageBus>,
        priorities: Arc<PriorityManager>,
        config: &Config,
    ) -> Self {
        Self {
            graph,
            bus,
            priorities,
            max_tasks_per_agent: config.max_tasks_per_agent,
        }
    }

    /// Create and register a task.
    pub async fn create_task(
        &self,
        name: &str,
        description: &str,
        payload: serde_json::Value,
        priority: Priority,
        coordination_group: Option<&str>,
        resource_requirements: Vec<String>,
    ) -> TaskId {
        let mut task = CoordinatedTask::new(name, description, payload, priority)
            .with_resources(resource_requirements);
        if let Some(group) = coordination_group {
            task = task.with_group(group);
        }
        let id = self.graph.add_task(task).await;
        qlog!("coordinator: created task {} '{}' ({})", id.short(), name, priority);
        id
    }

    /// Declare that `task_id` depends on `dependency_id`. Cycles are
    /// not rejected here; the conflict engine reports them.
    pub async fn add_dependency(
        &self,
        task_id: TaskId,
        dependency_id: TaskId,
        kind: DependencyKind,
        description: &str,
    ) -> bool {
        self.graph
            .add_dependency(task_id, dependency_id, kind, description)
            .await
    }

    pub async fn assign(&self, id: TaskId, agent: &AgentId) -> bool {
        self.graph.assign(id, agent).await
    }

    pub async fn start(&self, id: TaskId) -> bool {
        self.graph.start(id).await
    }

    pub async fn complete(&self, id: TaskId) -> bool {
        self.graph.complete(id).await
    }

    pub async fn fail(&self, id: TaskId) -> bool {
        self.graph.fail(id).await
    }

    pub async fn get_task(&self, id: TaskId) -> Option<CoordinatedTask> {
        self.graph.get_task(id).await
    }

    /// Pick the best ready task for `agent`.
    ///
    /// The agent must be under its concurrency cap, and none of the
    /// candidate's required resources may be in use by a running task
    /// of a different agent. Candidates are ordered by effective
    /// priority descending, then age.
    pub async fn next_available_task(&self, agent: &AgentId) -> Option<CoordinatedTask> {
        let running = self
            .graph
            .by_agent(agent)
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .count();
        if running >= self.max_tasks_per_agent {
            return None;
        }

        let in_progress = self.graph.by_status(TaskStatus::InProgress).await;
        let mut candidates = Vec::new();
        for task in self.graph.ready_tasks().await {
            let resource_busy = task.resource_requirements.iter().any(|resource| {
                in_progress.iter().any(|running| {
                    running.assigned_agent.as_ref() != Some(agent)
                        && running.resource_requirements.contains(resource)
                })
            });
            if resource_busy {
                continue;
            }
            let effective = self.priorities.effective_priority(task.task_id).await;
            candidates.push((effective, task));
        }

        candidates.sort_by(|(pa, a), (pb, b)| {
            pb.cmp(pa).then(a.created_at.cmp(&b.created_at))
        });
        candidates.into_iter().next().map(|(_, task)| task)
    }

    /// Notify every other assigned task in the same coordination
    /// group that `task_id` changed. Returns the notified task ids.
    pub async fn coordinate_group(&self, task_id: TaskId) -> Vec<TaskId> {
        let Some(task) = self.graph.get_task(task_id).await else {
            return Vec::new();
        };
        let Some(group) = task.coordination_group.clone() else {
            return Vec::new();
        };

        let mut notified = Vec::new();
        for member in self.graph.by_group(&group).await {
            if member.task_id == task_id {
                continue;
            }
            let Some(agent) = member.assigned_agent.clone() else {
                continue;
            };
            self.bus
                .send(
                    AgentId::from("task_coordinator"),
                    agent,
                    MessageType::Notification,
                    serde_json::json!({
                        "event": "group_coordination",
                        "coordination_group": group,
                        "updated_task": task.task_id,
                        "updated_task_name": task.name,
                        "updated_task_status": task.status,
                        "your_task": member.task_id,
                    }),
                    Priority::Medium,
                )
                .await;
            notified.push(member.task_id);
        }
        notified
    }

    /// Inspect resource contention for a task: for each required
    /// resource held by a running task of another agent, either ask
    /// the holder to yield (when this task's priority is strictly
    /// higher) or report that waiting is required.
    pub async fn resolve_resource_conflicts(
        &self,
        task_id: TaskId,
    ) -> Option<ResourceConflictReport> {
        let task = self.graph.get_task(task_id).await?;
        let in_progress = self.graph.by_status(TaskStatus::InProgress).await;

        let mut contentions = Vec::new();
        for resource in &task.resource_requirements {
            let holders: Vec<&CoordinatedTask> = in_progress
                .iter()
                .filter(|t| {
                    t.task_id != task_id
                        && t.resource_requirements.contains(resource)
                        && t.assigned_agent != task.assigned_agent
                })
                .collect();

            for holder in holders {
                let Some(holder_agent) = holder.assigned_agent.clone() else {
                    continue;
                };
                if task.priority > holder.priority {
                    let message_id = self
                        .bus
                        .send(
                            AgentId::from("task_coordinator"),
                            holder_agent.clone(),
                            MessageType::CoordinationRequest,
                            serde_json::json!({
                                "request_type": "resource_yield",
                                "resource_id": resource,
                                "requesting_task": task.task_id,
                                "requesting_task_name": task.name,
                                "requesting_priority": task.priority,
                                "holding_task": holder.task_id,
                            }),
                            Priority::High,
                        )
                        .await;
                    contentions.push(ContentionOutcome::YieldRequested {
                        resource_id: resource.clone(),
                        holder: holder_agent,
                        message_id,
                    });
                } else {
                    contentions.push(ContentionOutcome::WaitRequired {
                        resource_id: resource.clone(),
                        holder: holder_agent,
                    });
                }
            }
        }

        Some(ResourceConflictReport {
            task_id,
            contentions,
        })
    }

    /// Combined graph and bus metrics.
    pub async fn status(&self) -> CoordinationStatus {
        CoordinationStatus {
            graph: self.graph.metrics().await,
            bus: self.bus.metrics().await,
        }
    }
}
