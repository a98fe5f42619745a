//! Single-owner locking for named shared resources.
//!
//! The arbiter tracks at most one owner per resource. Contention never
//! blocks: a denied requester gets a coordination message id to await
//! while the owner decides whether to yield.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agent::AgentId;
use crate::coordination::bus::MessageBus;
use crate::coordination::message::{AgentMessage, MessageId, MessageType};
use crate::core::task::Priority;
use crate::{qlog, qlog_debug};

#[derive(Debug, Clone)]
struct ResourceOwner {
    agent: AgentId,
    priority: Priority,
}

/// Result of a resource access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The caller now owns the resource.
    Granted,
    /// Another agent owns the resource. A coordination request was
    /// sent to the owner; the caller should await its response.
    Contended {
        owner: AgentId,
        coordination_message: MessageId,
    },
}

impl AccessOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessOutcome::Granted)
    }
}

/// Owner-tracker for named shared resources.
///
/// All resource contention in the system routes through here; no other
/// component claims resources by mutating task state directly.
pub struct ResourceArbiter {
    owners: Mutex<HashMap<String, ResourceOwner>>,
    bus: Arc<MessageBus>,
}

impl ResourceArbiter {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            owners: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Request access to a resource. Grants immediately when the
    /// resource is free or already held by the caller. When held by
    /// someone else, sends a coordination request to the owner and
    /// returns without blocking.
    pub async fn request_access(
        &self,
        agent: &AgentId,
        resource_id: &str,
        access_type: &str,
        priority: Priority,
    ) -> AccessOutcome {
        let owner = {
            let mut owners = self.owners.lock().await;
            let existing = owners.get(resource_id).cloned();
            match existing {
                // Free, or a re-request by the holder (which refreshes
                // its recorded priority).
                None => {
                    owners.insert(
                        resource_id.to_string(),
                        ResourceOwner {
                            agent: agent.clone(),
                            priority,
                        },
                    );
                    qlog_debug!("arbiter: {} granted {}", agent, resource_id);
                    return AccessOutcome::Granted;
                }
                Some(owner) if owner.agent == *agent => {
                    owners.insert(
                        resource_id.to_string(),
                        ResourceOwner {
                            agent: agent.clone(),
                            priority,
                        },
                    );
                    return AccessOutcome::Granted;
                }
                Some(owner) => owner,
            }
        };

        qlog_debug!(
            "arbiter: {} contending with {} for {}",
            agent,
            owner.agent,
            resource_id
        );
        let coordination_message = self
            .bus
            .send(
                agent.clone(),
                owner.agent.clone(),
                MessageType::CoordinationRequest,
                serde_json::json!({
                    "request_type": "resource_access",
                    "resource_id": resource_id,
                    "requesting_agent": agent.as_str(),
                    "access_type": access_type,
                    "priority": priority,
                }),
                Priority::High,
            )
            .await;

        AccessOutcome::Contended {
            owner: owner.agent,
            coordination_message,
        }
    }

    /// Release a resource. No-op unless `agent` is the current owner.
    pub async fn release(&self, agent: &AgentId, resource_id: &str) -> bool {
        let mut owners = self.owners.lock().await;
        let is_owner = owners
            .get(resource_id)
            .is_some_and(|owner| owner.agent == *agent);
        if is_owner {
            owners.remove(resource_id);
            qlog_debug!("arbiter: {} released {}", agent, resource_id);
        }
        is_owner
    }

    /// Current owner of a resource, if any.
    pub async fn owner(&self, resource_id: &str) -> Option<AgentId> {
        self.owners
            .lock()
            .await
            .get(resource_id)
            .map(|o| o.agent.clone())
    }

    /// Decide a resource_access coordination request on behalf of the
    /// owning agent. The requester wins only with strictly higher
    /// priority than the holder's; ties keep the holder. Returns the
    /// response (or error) message that was sent back.
    pub async fn handle_coordination_request(&self, message: &AgentMessage) -> Option<AgentMessage> {
        let request_type = message.payload["request_type"].as_str().unwrap_or("");
        if request_type != "resource_access" {
            let id = self
                .bus
                .send_error(
                    message,
                    "unknown request type",
                    serde_json::json!({"request_type": request_type}),
                )
                .await;
            return self.bus.get_message(id).await;
        }

        let resource_id = message.payload["resource_id"].as_str().unwrap_or("");
        let requested_priority = serde_json::from_value::<Priority>(
            message.payload["priority"].clone(),
        )
        .unwrap_or(Priority::Medium);

        let decision = {
            let mut owners = self.owners.lock().await;
            let holder = owners
                .get(resource_id)
                .filter(|owner| owner.agent == message.recipient_id)
                .map(|owner| owner.priority);
            match holder {
                Some(holder_priority) => {
                    if requested_priority > holder_priority {
                        owners.remove(resource_id);
                        Ok((true, holder_priority))
                    } else {
                        Ok((false, holder_priority))
                    }
                }
                None => Err(()),
            }
        };

        let (granted, holder_priority) = match decision {
            Ok(d) => d,
            Err(()) => {
                let id = self
                    .bus
                    .send_error(
                        message,
                        "not the resource owner",
                        serde_json::json!({"resource_id": resource_id}),
                    )
                    .await;
                return self.bus.get_message(id).await;
            }
        };

        if granted {
            qlog!(
                "arbiter: {} yielded {} to {} ({} > {})",
                message.recipient_id,
                resource_id,
                message.sender_id,
                requested_priority,
                holder_priority
            );
        }

        let id = self
            .bus
            .respond(
                message,
                serde_json::json!({
                    "granted": granted,
                    "resource_id": resource_id,
                    "holder_priority": holder_priority,
                    "requested_priority": requested_priority,
                }),
            )
            .await;
        self.bus.get_message(id).await
    }
}
