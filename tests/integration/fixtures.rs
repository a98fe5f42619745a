//! Test fixtures for integration tests.
//!
//! Provides a fully wired coordination harness and a scripted agent
//! that implements the worker interface.

use std::sync::Arc;

use quorum::{
    Agent, AgentId, AgentMessage, CoordinatedTask, Config, ConflictEngine, MessageBus,
    MessageType, Priority, PriorityManager, TaskCoordinator, TaskGraph, TaskId,
};

/// Every component wired together the way a process would do it.
pub struct CoordinationHarness {
    pub bus: Arc<MessageBus>,
    pub graph: Arc<TaskGraph>,
    pub priorities: Arc<PriorityManager>,
    pub engine: Arc<ConflictEngine>,
    pub coordinator: TaskCoordinator,
}

impl CoordinationHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let bus = Arc::new(MessageBus::new());
        let graph = Arc::new(TaskGraph::new(bus.clone()));
        let priorities = Arc::new(PriorityManager::new(graph.clone()));
        let engine = Arc::new(ConflictEngine::new(
            graph.clone(),
            bus.clone(),
            priorities.clone(),
        ));
        let coordinator =
            TaskCoordinator::new(graph.clone(), bus.clone(), priorities.clone(), &config);

        Self {
            bus,
            graph,
            priorities,
            engine,
            coordinator,
        }
    }

    /// Create a task through the coordinator with no group or resources.
    pub async fn simple_task(&self, name: &str, priority: Priority) -> TaskId {
        self.coordinator
            .create_task(name, "", serde_json::json!({}), priority, None, vec![])
            .await
    }

    /// Create a task declaring the given resources.
    pub async fn resource_task(
        &self,
        name: &str,
        priority: Priority,
        resources: &[&str],
    ) -> TaskId {
        self.coordinator
            .create_task(
                name,
                "",
                serde_json::json!({}),
                priority,
                None,
                resources.iter().map(|r| r.to_string()).collect(),
            )
            .await
    }

    /// Create, assign, and start a task under the given agent.
    pub async fn run_task(
        &self,
        name: &str,
        priority: Priority,
        agent_name: &str,
        resources: &[&str],
    ) -> TaskId {
        let id = self.resource_task(name, priority, resources).await;
        assert!(self.coordinator.assign(id, &agent(agent_name)).await);
        assert!(self.coordinator.start(id).await);
        id
    }
}

impl Default for CoordinationHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn agent(name: &str) -> AgentId {
    AgentId::from(name)
}

/// A worker that acknowledges every task and every coordination
/// request with a canned payload.
pub struct ScriptedAgent {
    id: AgentId,
}

impl ScriptedAgent {
    pub fn new(name: &str) -> Self {
        Self {
            id: AgentId::from(name),
        }
    }
}

impl Agent for ScriptedAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn execute(&self, task: &CoordinatedTask) -> serde_json::Value {
        serde_json::json!({
            "executed_by": self.id.as_str(),
            "task_id": task.task_id,
            "ok": true,
        })
    }

    fn receive_message(&self, message: &AgentMessage) -> Option<serde_json::Value> {
        match message.message_type {
            MessageType::CoordinationRequest => Some(serde_json::json!({
                "ack": true,
                "agent": self.id.as_str(),
            })),
            _ => None,
        }
    }
}
