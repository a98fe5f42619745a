//! Bus behavior across components: delivery order, blocking receive,
//! and request/response exchanges between live agents.

use std::sync::Arc;
use std::time::Duration;

use quorum::{MessageBus, MessageType, Priority};

use crate::fixtures::agent;

/// Sending LOW then CRITICAL then HIGH must come back CRITICAL, HIGH, LOW.
#[tokio::test]
async fn test_priority_ordering_across_sends() {
    let bus = MessageBus::new();

    for (n, priority) in [
        (1, Priority::Low),
        (2, Priority::Critical),
        (3, Priority::High),
    ] {
        bus.send(
            agent("sender"),
            agent("worker"),
            MessageType::Notification,
            serde_json::json!({"n": n}),
            priority,
        )
        .await;
    }

    let mut received = Vec::new();
    while let Some(msg) = bus.receive(&agent("worker"), Some(Duration::ZERO)).await {
        received.push(msg.priority);
    }
    assert_eq!(
        received,
        vec![Priority::Critical, Priority::High, Priority::Low]
    );
}

/// A parked receiver wakes as soon as a message lands, well before
/// its timeout expires.
#[tokio::test]
async fn test_blocking_receive_wakes_on_enqueue() {
    let bus = Arc::new(MessageBus::new());

    let receiver = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.receive(&agent("worker"), Some(Duration::from_secs(10)))
                .await
        })
    };
    tokio::task::yield_now().await;

    let started = std::time::Instant::now();
    bus.send(
        agent("sender"),
        agent("worker"),
        MessageType::Notification,
        serde_json::json!({}),
        Priority::Low,
    )
    .await;

    let msg = receiver.await.unwrap();
    assert!(msg.is_some());
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Receive with a timeout returns None when nothing arrives.
#[tokio::test]
async fn test_receive_timeout_expires() {
    let bus = MessageBus::new();
    let msg = bus
        .receive(&agent("worker"), Some(Duration::from_millis(20)))
        .await;
    assert!(msg.is_none());
}

/// Two agents exchanging a request and response end-to-end, with the
/// pending set tracking the open request.
#[tokio::test]
async fn test_request_response_exchange() {
    let bus = Arc::new(MessageBus::new());

    let request_id = bus
        .send(
            agent("alpha"),
            agent("beta"),
            MessageType::Request,
            serde_json::json!({"question": "capacity?"}),
            Priority::Medium,
        )
        .await;
    assert_eq!(bus.pending_requests(&agent("beta")).await.len(), 1);

    // beta answers.
    let responder = {
        let bus = bus.clone();
        tokio::spawn(async move {
            let request = bus
                .receive(&agent("beta"), Some(Duration::from_secs(5)))
                .await
                .unwrap();
            bus.respond(&request, serde_json::json!({"capacity": 2}))
                .await
        })
    };
    responder.await.unwrap();

    let response = bus
        .receive(&agent("alpha"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(response.message_type, MessageType::Response);
    assert_eq!(response.correlation_id, Some(request_id));
    assert_eq!(response.reply_to, Some(request_id));
    assert_eq!(response.payload["capacity"], 2);
    assert!(bus.pending_requests(&agent("beta")).await.is_empty());
}

/// Message history survives delivery and filters per agent.
#[tokio::test]
async fn test_history_audit_trail() {
    let bus = MessageBus::new();
    bus.send(
        agent("a"),
        agent("b"),
        MessageType::Notification,
        serde_json::json!({}),
        Priority::Medium,
    )
    .await;
    bus.send(
        agent("b"),
        agent("a"),
        MessageType::Notification,
        serde_json::json!({}),
        Priority::Medium,
    )
    .await;
    let _ = bus.receive(&agent("b"), Some(Duration::ZERO)).await;

    assert_eq!(bus.history(None).await.len(), 2);
    assert_eq!(bus.history(Some(&agent("a"))).await.len(), 2);
    assert_eq!(bus.history(Some(&agent("c"))).await.len(), 0);
}
