//! End-to-end task flow through the coordinator façade: creation,
//! dependency gating, agent selection, execution, and the signals
//! that fan out over the bus along the way.

use std::time::Duration;

use quorum::{Agent, Config, DependencyKind, MessageType, Priority, TaskStatus};

use crate::fixtures::{agent, CoordinationHarness, ScriptedAgent};

/// A chain a -> b -> c unlocks one task at a time as work completes,
/// and each completion notifies the downstream agent.
#[tokio::test]
async fn test_dependency_chain_execution() {
    let h = CoordinationHarness::new();

    let a = h.simple_task("a", Priority::Medium).await;
    let b = h.simple_task("b", Priority::Medium).await;
    let c = h.simple_task("c", Priority::Medium).await;
    assert!(h.coordinator.add_dependency(b, a, DependencyKind::Hard, "b after a").await);
    assert!(h.coordinator.add_dependency(c, b, DependencyKind::Hard, "c after b").await);

    // Only a is ready.
    let picked = h.coordinator.next_available_task(&agent("w1")).await.unwrap();
    assert_eq!(picked.task_id, a);

    h.coordinator.assign(a, &agent("w1")).await;
    h.coordinator.assign(b, &agent("w2")).await;
    h.coordinator.start(a).await;
    h.coordinator.complete(a).await;

    // w2 hears that its dependency finished.
    let msg = h.bus.receive(&agent("w2"), Some(Duration::ZERO)).await.unwrap();
    assert_eq!(msg.message_type, MessageType::Notification);
    assert_eq!(msg.payload["event"], "dependency_completed");

    // b became startable; c is still gated.
    let ready: Vec<_> = h.graph.ready_tasks().await;
    assert!(ready.is_empty()); // b is already Assigned, c gated
    assert!(h.coordinator.start(b).await);
    h.coordinator.complete(b).await;

    let picked = h.coordinator.next_available_task(&agent("w3")).await.unwrap();
    assert_eq!(picked.task_id, c);
}

/// A worker drives a task through the Agent trait: pull, execute,
/// report completion.
#[tokio::test]
async fn test_agent_executes_pulled_task() {
    let h = CoordinationHarness::new();
    let worker = ScriptedAgent::new("w1");

    let id = h.simple_task("compile", Priority::High).await;

    let task = h
        .coordinator
        .next_available_task(worker.id())
        .await
        .unwrap();
    assert_eq!(task.task_id, id);

    h.coordinator.assign(task.task_id, worker.id()).await;
    h.coordinator.start(task.task_id).await;

    let result = worker.execute(&task);
    assert_eq!(result["ok"], true);
    assert_eq!(result["executed_by"], "w1");

    assert!(h.coordinator.complete(task.task_id).await);
    assert_eq!(
        h.coordinator.get_task(id).await.unwrap().status,
        TaskStatus::Completed
    );
}

/// An agent at its concurrency cap gets nothing, even with Critical
/// work waiting; a fresh agent picks it up.
#[tokio::test]
async fn test_concurrency_cap_enforced() {
    let h = CoordinationHarness::new();

    for name in ["t1", "t2", "t3"] {
        h.run_task(name, Priority::Medium, "busy", &[]).await;
    }
    let urgent = h.simple_task("urgent", Priority::Critical).await;

    assert!(h.coordinator.next_available_task(&agent("busy")).await.is_none());
    let picked = h.coordinator.next_available_task(&agent("idle")).await.unwrap();
    assert_eq!(picked.task_id, urgent);
}

/// The per-agent cap comes from configuration, not a constant.
#[tokio::test]
async fn test_concurrency_cap_configurable() {
    let h = CoordinationHarness::with_config(Config {
        max_tasks_per_agent: 1,
        monitor_interval_secs: 5,
    });
    h.run_task("only", Priority::Medium, "w", &[]).await;
    h.simple_task("more", Priority::Medium).await;

    assert!(h.coordinator.next_available_task(&agent("w")).await.is_none());
}

/// Cancelling a hard dependency unblocks its dependents.
#[tokio::test]
async fn test_cancelled_dependency_unblocks() {
    let h = CoordinationHarness::new();
    let doomed = h.simple_task("doomed", Priority::Medium).await;
    let next = h.simple_task("next", Priority::Medium).await;
    h.coordinator
        .add_dependency(next, doomed, DependencyKind::Hard, "")
        .await;

    assert!(h.coordinator.next_available_task(&agent("w")).await.map(|t| t.task_id) == Some(doomed));

    h.graph.update_status(doomed, TaskStatus::Cancelled).await;

    let picked = h.coordinator.next_available_task(&agent("w")).await.unwrap();
    assert_eq!(picked.task_id, next);
}

/// Group members with assigned agents hear about updates to a peer.
#[tokio::test]
async fn test_group_coordination_notifications() {
    let h = CoordinationHarness::new();
    let updated = h
        .coordinator
        .create_task("updated", "", serde_json::json!({}), Priority::Medium, Some("release"), vec![])
        .await;
    let peer = h
        .coordinator
        .create_task("peer", "", serde_json::json!({}), Priority::Medium, Some("release"), vec![])
        .await;
    h.coordinator.assign(peer, &agent("p")).await;

    let notified = h.coordinator.coordinate_group(updated).await;
    assert_eq!(notified, vec![peer]);

    let msg = h.bus.receive(&agent("p"), Some(Duration::ZERO)).await.unwrap();
    assert_eq!(msg.payload["event"], "group_coordination");
    assert_eq!(msg.payload["coordination_group"], "release");
}

/// A priority override changes which task an agent is handed next.
#[tokio::test]
async fn test_override_steers_selection() {
    let h = CoordinationHarness::new();
    h.simple_task("routine", Priority::High).await;
    let sleeper = h.simple_task("sleeper", Priority::Low).await;

    h.priorities.set_override(sleeper, Priority::Critical).await;

    let picked = h.coordinator.next_available_task(&agent("w")).await.unwrap();
    assert_eq!(picked.task_id, sleeper);
}

/// A low-priority task holding up critical work climbs one level per
/// escalation pass, never past Critical.
#[tokio::test]
async fn test_escalation_one_step_at_a_time() {
    let h = CoordinationHarness::new();
    let blocker = h.simple_task("blocker", Priority::Low).await;
    let critical = h.simple_task("critical", Priority::Critical).await;
    h.coordinator
        .add_dependency(critical, blocker, DependencyKind::Hard, "")
        .await;

    assert!(h.priorities.escalate_if_blocking_higher_priority(blocker).await);
    assert_eq!(h.priorities.effective_priority(blocker).await, Priority::Medium);

    // Converges to Critical and stops.
    while h.priorities.escalate_if_blocking_higher_priority(blocker).await {}
    assert_eq!(
        h.priorities.effective_priority(blocker).await,
        Priority::Critical
    );

    let analysis = h.priorities.analysis().await;
    assert_eq!(analysis.overridden_count, 1);
}

/// The combined status snapshot reflects graph and bus activity.
#[tokio::test]
async fn test_status_snapshot() {
    let h = CoordinationHarness::new();
    let a = h.run_task("a", Priority::Medium, "w1", &[]).await;
    let b = h.simple_task("b", Priority::Medium).await;
    h.coordinator.add_dependency(b, a, DependencyKind::Hard, "").await;
    h.coordinator.assign(b, &agent("w2")).await;
    h.coordinator.complete(a).await; // sends a dependent notification

    let status = h.coordinator.status().await;
    assert_eq!(status.graph.total, 2);
    assert_eq!(status.graph.completed, 1);
    assert_eq!(status.graph.total_dependency_edges, 1);
    assert_eq!(status.bus.total_sent, 1);
}

/// Resource-yield flow: a higher-priority task asks the holder to
/// yield; the holder's worker acknowledges over the bus.
#[tokio::test]
async fn test_resource_yield_request_flow() {
    let h = CoordinationHarness::new();
    let holder_worker = ScriptedAgent::new("holder");

    h.run_task("holding", Priority::Low, "holder", &["db"]).await;
    let urgent = h.resource_task("urgent", Priority::High, &["db"]).await;
    h.coordinator.assign(urgent, &agent("contender")).await;

    let report = h.coordinator.resolve_resource_conflicts(urgent).await.unwrap();
    assert_eq!(report.contentions.len(), 1);

    let request = h
        .bus
        .receive(&agent("holder"), Some(Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(request.message_type, MessageType::CoordinationRequest);

    // The worker decides and answers through its message handler.
    let answer = holder_worker.receive_message(&request).unwrap();
    h.bus.respond(&request, answer).await;

    // The reply correlates with the yield request and routes back to
    // the coordinator that sent it.
    let response = h
        .bus
        .receive(&agent("task_coordinator"), Some(Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(response.message_type, MessageType::Response);
    assert_eq!(response.correlation_id, Some(request.message_id));
    assert_eq!(response.payload["ack"], true);
}
