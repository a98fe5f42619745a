//! Priority mailbox system for agent-to-agent messages.
//!
//! The bus is a best-effort, at-least-once mailbox, not a transactional
//! queue: `send` always succeeds, absence is `None`, and nothing here
//! returns an error. Delivery order for a recipient is priority
//! descending, then arrival order.

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::agent::AgentId;
use crate::coordination::message::{AgentMessage, MessageId, MessageType};
use crate::core::task::Priority;
use crate::qlog_debug;

struct QueuedMessage {
    /// Enqueue sequence number, breaks ties between equal-priority
    /// messages that carry the same timestamp.
    seq: u64,
    message: AgentMessage,
}

#[derive(Default)]
struct BusState {
    queue: Vec<QueuedMessage>,
    next_seq: u64,
    /// Every message ever sent, by id.
    store: HashMap<MessageId, AgentMessage>,
    /// Append-only send log.
    history: Vec<AgentMessage>,
    /// Request-type messages awaiting a response, by request id.
    pending_requests: HashMap<MessageId, AgentMessage>,
    delivered: u64,
}

/// Snapshot of bus activity.
#[derive(Debug, Clone, Serialize)]
pub struct BusMetrics {
    pub queued: usize,
    pub pending_requests: usize,
    pub total_sent: usize,
    pub total_delivered: u64,
}

/// Thread-safe priority mailbox with request/response correlation.
///
/// `receive` is the only suspension point in the crate: it parks the
/// caller on a [`Notify`] and wakes immediately when a message is
/// enqueued, rather than polling.
pub struct MessageBus {
    state: Mutex<BusState>,
    notify: Notify,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a new message. Always succeeds.
    pub async fn send(
        &self,
        sender: AgentId,
        recipient: AgentId,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: Priority,
    ) -> MessageId {
        self.send_correlated(sender, recipient, message_type, payload, priority, None, None)
            .await
    }

    /// Full-form send carrying correlation and reply-to ids for
    /// messages that continue an existing exchange.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_correlated(
        &self,
        sender: AgentId,
        recipient: AgentId,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: Priority,
        correlation_id: Option<MessageId>,
        reply_to: Option<MessageId>,
    ) -> MessageId {
        let mut message = AgentMessage::new(sender, recipient, message_type, payload, priority);
        message.correlation_id = correlation_id;
        message.reply_to = reply_to;
        self.enqueue(message).await
    }

    /// Build and enqueue a RESPONSE to `original`, carrying its id as
    /// both correlation and reply-to id and inheriting its priority.
    /// Answering a request also clears it from the pending set.
    pub async fn respond(
        &self,
        original: &AgentMessage,
        payload: serde_json::Value,
    ) -> MessageId {
        let mut message = AgentMessage::new(
            original.recipient_id.clone(),
            original.sender_id.clone(),
            MessageType::Response,
            payload,
            original.priority,
        );
        message.correlation_id = Some(original.message_id);
        message.reply_to = Some(original.message_id);

        {
            let mut state = self.state.lock().await;
            state.pending_requests.remove(&original.message_id);
        }
        self.enqueue(message).await
    }

    /// Build and enqueue an ERROR message for `original`. Errors are
    /// always sent at High priority so they jump the queue.
    pub async fn send_error(
        &self,
        original: &AgentMessage,
        error: &str,
        details: serde_json::Value,
    ) -> MessageId {
        let mut message = AgentMessage::new(
            original.recipient_id.clone(),
            original.sender_id.clone(),
            MessageType::Error,
            serde_json::json!({
                "error": error,
                "details": details,
            }),
            Priority::High,
        );
        message.correlation_id = Some(original.message_id);
        message.reply_to = Some(original.message_id);

        {
            let mut state = self.state.lock().await;
            state.pending_requests.remove(&original.message_id);
        }
        self.enqueue(message).await
    }

    async fn enqueue(&self, message: AgentMessage) -> MessageId {
        let id = message.message_id;
        let mut state = self.state.lock().await;
        qlog_debug!(
            "bus: enqueue {} {} -> {} ({})",
            message.message_type,
            message.sender_id,
            message.recipient_id,
            id.short()
        );

        if matches!(
            message.message_type,
            MessageType::Request | MessageType::CoordinationRequest
        ) {
            state.pending_requests.insert(id, message.clone());
        }

        state.store.insert(id, message.clone());
        state.history.push(message.clone());
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(QueuedMessage { seq, message });
        drop(state);

        self.notify.notify_waiters();
        id
    }

    /// Dequeue the best message for `agent`, if any: highest priority
    /// first, then earliest enqueued.
    async fn try_take(&self, agent: &AgentId) -> Option<AgentMessage> {
        let mut state = self.state.lock().await;
        let best = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, q)| q.message.recipient_id == *agent)
            .max_by_key(|(_, q)| (q.message.priority, Reverse(q.seq)))
            .map(|(idx, _)| idx)?;
        let taken = state.queue.remove(best);
        state.delivered += 1;
        Some(taken.message)
    }

    /// Return the best queued message for `agent`, waiting up to
    /// `timeout` for one to arrive. `None` timeout blocks indefinitely.
    pub async fn receive(&self, agent: &AgentId, timeout: Option<Duration>) -> Option<AgentMessage> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            // Register for wakeup before checking the queue so an
            // enqueue between the check and the await is not lost.
            let notified = self.notify.notified();
            if let Some(message) = self.try_take(agent).await {
                return Some(message);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_take(agent).await;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Look up any previously sent message by id.
    pub async fn get_message(&self, id: MessageId) -> Option<AgentMessage> {
        self.state.lock().await.store.get(&id).cloned()
    }

    /// The send log, optionally filtered to messages sent by or
    /// addressed to `agent`.
    pub async fn history(&self, agent: Option<&AgentId>) -> Vec<AgentMessage> {
        let state = self.state.lock().await;
        match agent {
            Some(agent) => state
                .history
                .iter()
                .filter(|m| m.sender_id == *agent || m.recipient_id == *agent)
                .cloned()
                .collect(),
            None => state.history.clone(),
        }
    }

    /// Request-type messages addressed to `agent` that have not been
    /// answered yet.
    pub async fn pending_requests(&self, agent: &AgentId) -> Vec<AgentMessage> {
        let state = self.state.lock().await;
        let mut pending: Vec<AgentMessage> = state
            .pending_requests
            .values()
            .filter(|m| m.recipient_id == *agent)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.timestamp);
        pending
    }

    /// Drop a request from the pending set without answering it.
    pub async fn clear_pending_request(&self, id: MessageId) -> bool {
        self.state.lock().await.pending_requests.remove(&id).is_some()
    }

    pub async fn metrics(&self) -> BusMetrics {
        let state = self.state.lock().await;
        BusMetrics {
            queued: state.queue.len(),
            pending_requests: state.pending_requests.len(),
            total_sent: state.history.len(),
            total_delivered: state.delivered,
        }
    }
}
