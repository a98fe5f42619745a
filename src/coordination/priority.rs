//! Priority overrides and escalation.
//!
//! Overrides never touch a task's declared priority; they sit in a
//! side table and win when present. Escalation moves one level at a
//! time so a chain of passes converges gradually instead of jumping
//! everything to Critical.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::coordination::graph::TaskGraph;
use crate::core::task::{Priority, TaskId};
use crate::qlog;

/// Snapshot of the current priority landscape.
#[derive(Debug, Clone, Serialize)]
pub struct PriorityAnalysis {
    /// Effective-priority name -> task count.
    pub priority_distribution: HashMap<String, usize>,
    pub total_tasks: usize,
    pub overridden_count: usize,
}

pub struct PriorityManager {
    graph: Arc<TaskGraph>,
    overrides: Mutex<HashMap<TaskId, Priority>>,
}

impl PriorityManager {
    pub fn new(graph: Arc<TaskGraph>) -> Self {
        Self {
            graph,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    /// Override a task's priority. Fails for unknown tasks.
    pub async fn set_override(&self, id: TaskId, priority: Priority) -> bool {
        if self.graph.get_task(id).await.is_none() {
            return false;
        }
        self.overrides.lock().await.insert(id, priority);
        true
    }

    /// Remove an override. Returns whether one was present.
    pub async fn clear_override(&self, id: TaskId) -> bool {
        self.overrides.lock().await.remove(&id).is_some()
    }

    /// The priority in effect for a task: the override if set, else
    /// the declared priority, else Medium for unknown tasks.
    pub async fn effective_priority(&self, id: TaskId) -> Priority {
        if let Some(priority) = self.overrides.lock().await.get(&id) {
            return *priority;
        }
        match self.graph.get_task(id).await {
            Some(task) => task.priority,
            None => Priority::Medium,
        }
    }

    /// Bump a task one priority level when any of its dependents has
    /// a strictly higher effective priority. No-op at Critical.
    /// Returns whether an escalation happened.
    pub async fn escalate_if_blocking_higher_priority(&self, id: TaskId) -> bool {
        let Some(task) = self.graph.get_task(id).await else {
            return false;
        };
        let current = self.effective_priority(id).await;
        if current == Priority::Critical {
            return false;
        }

        for dependent in &task.dependents {
            let dependent_priority = self.effective_priority(*dependent).await;
            if dependent_priority > current {
                let bumped = current.bump();
                self.overrides.lock().await.insert(id, bumped);
                qlog!(
                    "priority: escalated {} {} -> {} (blocks {} at {})",
                    id.short(),
                    current,
                    bumped,
                    dependent.short(),
                    dependent_priority
                );
                return true;
            }
        }
        false
    }

    /// Distribution of effective priorities across all tasks.
    pub async fn analysis(&self) -> PriorityAnalysis {
        let tasks = self.graph.all_tasks().await;
        let overrides = self.overrides.lock().await;

        let mut priority_distribution: HashMap<String, usize> = HashMap::new();
        for task in &tasks {
            let effective = overrides
                .get(&task.task_id)
                .copied()
                .unwrap_or(task.priority);
            *priority_distribution
                .entry(effective.as_str().to_string())
                .or_insert(0) += 1;
        }

        PriorityAnalysis {
            priority_distribution,
            total_tasks: tasks.len(),
            overridden_count: overrides.len(),
        }
    }
}
