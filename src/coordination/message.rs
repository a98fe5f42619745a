//! Message data model for agent-to-agent communication.
//!
//! Messages are immutable once created. The bus hands out clones; the
//! canonical copy lives in the bus's store and history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;
use crate::core::task::Priority;

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Asks the recipient to do or answer something.
    Request,
    /// Answers a Request; carries the request id as correlation_id.
    Response,
    /// One-way informational message.
    Notification,
    /// Reports a failure handling an earlier message.
    Error,
    /// Opens a coordination exchange (resource yield, negotiation).
    CoordinationRequest,
    /// Answers a CoordinationRequest.
    CoordinationResponse,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
            MessageType::Error => "error",
            MessageType::CoordinationRequest => "coordination_request",
            MessageType::CoordinationResponse => "coordination_response",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message exchanged between agents through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message_id: MessageId,
    pub sender_id: AgentId,
    pub recipient_id: AgentId,
    pub message_type: MessageType,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    /// Opaque caller-defined content.
    pub payload: serde_json::Value,
    /// Links a response back to the message it answers.
    pub correlation_id: Option<MessageId>,
    /// Where replies should be routed, when not the sender.
    pub reply_to: Option<MessageId>,
}

impl AgentMessage {
    pub fn new(
        sender_id: AgentId,
        recipient_id: AgentId,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            message_id: MessageId::new(),
            sender_id,
            recipient_id,
            message_type,
            priority,
            timestamp: Utc::now(),
            payload,
            correlation_id: None,
            reply_to: None,
        }
    }
}
