//! Agent identity and the worker interface.
//!
//! Agents are external workers: they pull tasks from the coordinator,
//! execute them, and exchange messages over the bus. The coordination
//! core only knows them by id.

use serde::{Deserialize, Serialize};

use crate::coordination::message::AgentMessage;
use crate::core::task::CoordinatedTask;

/// Identity of an agent participating in coordination.
///
/// Agent ids are caller-supplied strings; the core treats them as
/// opaque. Authentication of presented ids is an external concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The interface a worker implementation presents to the core.
///
/// Implementations execute tasks handed to them and answer messages
/// routed to their id. Both calls receive copies; workers never hold
/// references into the core's internal maps.
pub trait Agent: Send + Sync {
    /// This worker's identity.
    fn id(&self) -> &AgentId;

    /// Execute a task and produce a result payload.
    fn execute(&self, task: &CoordinatedTask) -> serde_json::Value;

    /// Handle a message addressed to this worker. Returns a response
    /// payload, or None when no reply is warranted.
    fn receive_message(&self, message: &AgentMessage) -> Option<serde_json::Value>;
}
