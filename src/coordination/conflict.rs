//! Conflict detection and resolution.
//!
//! The engine audits the task graph for four conflict classes and
//! resolves each with a strategy keyed by type. Priority and
//! time-based strategies force an outcome; negotiation and escalation
//! hand the decision to agents and leave the conflict open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentId;
use crate::coordination::bus::MessageBus;
use crate::coordination::graph::TaskGraph;
use crate::coordination::message::MessageType;
use crate::coordination::priority::PriorityManager;
use crate::core::task::{CoordinatedTask, Priority, TaskId, TaskStatus};
use crate::{qlog, qlog_debug, Error, Result};

/// Unique identifier for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConflictId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four conflict classes the detection pass looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Multiple agents running tasks that declare the same resource.
    Resource,
    /// A high-priority ready task waiting behind lower-priority work.
    Priority,
    /// A dependency cycle.
    Dependency,
    /// Multiple agents running tasks in one coordination group.
    Task,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Resource => "resource",
            ConflictType::Priority => "priority",
            ConflictType::Dependency => "dependency",
            ConflictType::Task => "task",
        }
    }
}

/// Where a conflict stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Detected,
    Resolved,
    /// Agents were asked to negotiate; no outcome forced.
    NegotiationInProgress,
    /// Routed to the orchestrator for a decision.
    Escalated,
}

/// How a conflict gets resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Highest declared priority wins; the rest are blocked.
    PriorityBased,
    /// Oldest task wins; the rest are blocked.
    TimeBased,
    /// Ask the involved agents to sort it out.
    Negotiation,
    /// Hand the conflict to the orchestrator at Critical priority.
    Escalation,
}

/// A detected contention state between agents or tasks.
///
/// Created by the detection pass, mutated once by the resolver, then
/// retained unchanged in the resolution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_id: ConflictId,
    pub conflict_type: ConflictType,
    pub involved_agents: Vec<AgentId>,
    pub involved_tasks: Vec<TaskId>,
    pub resource_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub resolution_result: Option<serde_json::Value>,
}

impl Conflict {
    fn new(
        conflict_type: ConflictType,
        involved_agents: Vec<AgentId>,
        involved_tasks: Vec<TaskId>,
        resource_id: Option<String>,
    ) -> Self {
        Self {
            conflict_id: ConflictId::new(),
            conflict_type,
            involved_agents,
            involved_tasks,
            resource_id,
            detected_at: Utc::now(),
            status: ConflictStatus::Detected,
            resolution_strategy: None,
            resolution_result: None,
        }
    }
}

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub detected: usize,
    pub resolved: usize,
    /// Conflict-type name -> count detected this pass.
    pub by_type: HashMap<String, usize>,
    pub elapsed_ms: u128,
}

struct MonitorHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Detects conflicts in the task graph and resolves them.
pub struct ConflictEngine {
    graph: Arc<TaskGraph>,
    bus: Arc<MessageBus>,
    priorities: Arc<PriorityManager>,
    detection_history: Mutex<Vec<Conflict>>,
    resolution_history: Mutex<Vec<Conflict>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ConflictEngine {
    pub fn new(
        graph: Arc<TaskGraph>,
        bus: Arc<MessageBus>,
        priorities: Arc<PriorityManager>,
    ) -> Self {
        Self {
            graph,
            bus,
            priorities,
            detection_history: Mutex::new(Vec::new()),
            resolution_history: Mutex::new(Vec::new()),
            monitor: Mutex::new(None),
        }
    }

    /// Run all four detectors and record what they find.
    pub async fn detect_conflicts(&self) -> Vec<Conflict> {
        let tasks = self.graph.all_tasks().await;
        let in_progress: Vec<&CoordinatedTask> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .collect();

        let mut conflicts = Vec::new();
        self.detect_resource_conflicts(&in_progress, &mut conflicts);
        self.detect_priority_conflicts(&in_progress, &mut conflicts)
            .await;
        self.detect_dependency_conflicts(&tasks, &mut conflicts)
            .await;
        self.detect_group_conflicts(&in_progress, &mut conflicts);

        if !conflicts.is_empty() {
            qlog_debug!("conflict: detected {} conflict(s)", conflicts.len());
            self.detection_history
                .lock()
                .await
                .extend(conflicts.iter().cloned());
        }
        conflicts
    }

    /// Two or more agents running tasks that declare the same resource.
    fn detect_resource_conflicts(
        &self,
        in_progress: &[&CoordinatedTask],
        conflicts: &mut Vec<Conflict>,
    ) {
        let mut by_resource: HashMap<&str, Vec<&CoordinatedTask>> = HashMap::new();
        for &task in in_progress {
            for resource in &task.resource_requirements {
                by_resource.entry(resource.as_str()).or_default().push(task);
            }
        }

        let mut resources: Vec<&str> = by_resource.keys().copied().collect();
        resources.sort_unstable();
        for resource in resources {
            let tasks = &by_resource[resource];
            if tasks.len() < 2 {
                continue;
            }
            let agents = distinct_agents(tasks);
            if agents.len() < 2 {
                continue;
            }
            conflicts.push(Conflict::new(
                ConflictType::Resource,
                agents,
                tasks.iter().map(|t| t.task_id).collect(),
                Some(resource.to_string()),
            ));
        }
    }

    /// A High/Critical ready task while a Low/Medium task runs under a
    /// different agent. One conflict per ready task, first match only.
    async fn detect_priority_conflicts(
        &self,
        in_progress: &[&CoordinatedTask],
        conflicts: &mut Vec<Conflict>,
    ) {
        let ready = self.graph.ready_tasks().await;
        for waiting in ready
            .iter()
            .filter(|t| t.priority >= Priority::High)
        {
            let running = in_progress.iter().find(|t| {
                t.priority <= Priority::Medium && t.assigned_agent != waiting.assigned_agent
            });
            if let Some(running) = running {
                let mut agents = Vec::new();
                if let Some(agent) = &running.assigned_agent {
                    agents.push(agent.clone());
                }
                if let Some(agent) = &waiting.assigned_agent {
                    agents.push(agent.clone());
                }
                conflicts.push(Conflict::new(
                    ConflictType::Priority,
                    agents,
                    vec![waiting.task_id, running.task_id],
                    None,
                ));
            }
        }
    }

    /// Every dependency cycle longer than one node.
    async fn detect_dependency_conflicts(
        &self,
        tasks: &[CoordinatedTask],
        conflicts: &mut Vec<Conflict>,
    ) {
        let by_id: HashMap<TaskId, &CoordinatedTask> =
            tasks.iter().map(|t| (t.task_id, t)).collect();
        for cycle in self.graph.detect_cycles().await {
            if cycle.len() <= 1 {
                continue;
            }
            let mut agents = Vec::new();
            for id in &cycle {
                if let Some(agent) = by_id.get(id).and_then(|t| t.assigned_agent.clone()) {
                    if !agents.contains(&agent) {
                        agents.push(agent);
                    }
                }
            }
            conflicts.push(Conflict::new(
                ConflictType::Dependency,
                agents,
                cycle,
                None,
            ));
        }
    }

    /// Two or more agents running tasks in the same coordination group.
    fn detect_group_conflicts(
        &self,
        in_progress: &[&CoordinatedTask],
        conflicts: &mut Vec<Conflict>,
    ) {
        let mut by_group: HashMap<&str, Vec<&CoordinatedTask>> = HashMap::new();
        for &task in in_progress {
            if let Some(group) = &task.coordination_group {
                by_group.entry(group.as_str()).or_default().push(task);
            }
        }

        let mut groups: Vec<&str> = by_group.keys().copied().collect();
        groups.sort_unstable();
        for group in groups {
            let tasks = &by_group[group];
            let agents = distinct_agents(tasks);
            if tasks.len() < 2 || agents.len() < 2 {
                continue;
            }
            conflicts.push(Conflict::new(
                ConflictType::Task,
                agents,
                tasks.iter().map(|t| t.task_id).collect(),
                None,
            ));
        }
    }

    /// Resolve with the strategy keyed by conflict type:
    /// Resource/Priority get a forced priority-based outcome,
    /// Dependency/Task go to negotiation.
    pub async fn resolve(&self, conflict: &Conflict) -> Conflict {
        let strategy = match conflict.conflict_type {
            ConflictType::Resource | ConflictType::Priority => ResolutionStrategy::PriorityBased,
            ConflictType::Dependency | ConflictType::Task => ResolutionStrategy::Negotiation,
        };
        self.resolve_with_strategy(conflict, strategy).await
    }

    /// Resolve with an explicit strategy. Time-based and escalation
    /// are only reachable through this entry point.
    pub async fn resolve_with_strategy(
        &self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
    ) -> Conflict {
        let mut resolved = conflict.clone();
        resolved.resolution_strategy = Some(strategy);

        let (status, result) = match strategy {
            ResolutionStrategy::PriorityBased => self.resolve_priority_based(&resolved).await,
            ResolutionStrategy::TimeBased => self.resolve_time_based(&resolved).await,
            ResolutionStrategy::Negotiation => self.resolve_negotiation(&resolved).await,
            ResolutionStrategy::Escalation => self.resolve_escalation(&resolved).await,
        };
        resolved.status = status;
        resolved.resolution_result = Some(result);

        // A resolution can leave a lower-priority task blocking work
        // above it; give each involved task an escalation check.
        for task_id in &resolved.involved_tasks {
            self.priorities
                .escalate_if_blocking_higher_priority(*task_id)
                .await;
        }

        qlog!(
            "conflict: {} {} resolved via {:?} -> {:?}",
            resolved.conflict_type.as_str(),
            resolved.conflict_id.short(),
            strategy,
            resolved.status
        );
        self.resolution_history.lock().await.push(resolved.clone());
        resolved
    }

    /// Highest declared priority keeps running; everyone else is
    /// blocked and their agent notified which task won.
    async fn resolve_priority_based(
        &self,
        conflict: &Conflict,
    ) -> (ConflictStatus, serde_json::Value) {
        let mut tasks = self.involved_tasks(conflict).await;
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        let result = self.block_all_but_winner(&tasks).await;
        (ConflictStatus::Resolved, result)
    }

    /// Oldest task keeps running; tie-break for equal priorities.
    async fn resolve_time_based(
        &self,
        conflict: &Conflict,
    ) -> (ConflictStatus, serde_json::Value) {
        let mut tasks = self.involved_tasks(conflict).await;
        tasks.sort_by_key(|t| t.created_at);
        let result = self.block_all_but_winner(&tasks).await;
        (ConflictStatus::Resolved, result)
    }

    async fn block_all_but_winner(&self, tasks: &[CoordinatedTask]) -> serde_json::Value {
        let Some(winner) = tasks.first() else {
            return serde_json::json!({"winner": null, "blocked": []});
        };
        self.graph
            .update_status(winner.task_id, TaskStatus::InProgress)
            .await;

        let mut blocked = Vec::new();
        for task in &tasks[1..] {
            if !self.graph.update_status(task.task_id, TaskStatus::Blocked).await {
                continue;
            }
            blocked.push(task.task_id);
            if let Some(agent) = &task.assigned_agent {
                self.bus
                    .send(
                        AgentId::from("conflict_engine"),
                        agent.clone(),
                        MessageType::Notification,
                        serde_json::json!({
                            "event": "task_blocked",
                            "task_id": task.task_id,
                            "blocked_by": winner.task_id,
                            "blocked_by_name": winner.name,
                        }),
                        Priority::High,
                    )
                    .await;
            }
        }
        serde_json::json!({"winner": winner.task_id, "blocked": blocked})
    }

    /// Ask every involved agent to work it out; no outcome is forced.
    async fn resolve_negotiation(
        &self,
        conflict: &Conflict,
    ) -> (ConflictStatus, serde_json::Value) {
        let context = serde_json::json!({
            "request_type": "conflict_negotiation",
            "conflict_id": conflict.conflict_id,
            "conflict_type": conflict.conflict_type.as_str(),
            "involved_tasks": conflict.involved_tasks,
            "involved_agents": conflict.involved_agents,
            "resource_id": conflict.resource_id,
        });

        let mut messages = Vec::new();
        for agent in &conflict.involved_agents {
            let id = self
                .bus
                .send(
                    AgentId::from("conflict_engine"),
                    agent.clone(),
                    MessageType::CoordinationRequest,
                    context.clone(),
                    Priority::High,
                )
                .await;
            messages.push(id);
        }
        (
            ConflictStatus::NegotiationInProgress,
            serde_json::json!({"requested_agents": conflict.involved_agents, "messages": messages}),
        )
    }

    /// Route the conflict to the orchestrator at Critical priority.
    async fn resolve_escalation(
        &self,
        conflict: &Conflict,
    ) -> (ConflictStatus, serde_json::Value) {
        let id = self
            .bus
            .send(
                AgentId::from("conflict_engine"),
                AgentId::from("orchestrator"),
                MessageType::CoordinationRequest,
                serde_json::json!({
                    "request_type": "conflict_escalation",
                    "conflict_id": conflict.conflict_id,
                    "conflict_type": conflict.conflict_type.as_str(),
                    "involved_tasks": conflict.involved_tasks,
                    "involved_agents": conflict.involved_agents,
                    "resource_id": conflict.resource_id,
                }),
                Priority::Critical,
            )
            .await;
        (
            ConflictStatus::Escalated,
            serde_json::json!({"escalated_to": "orchestrator", "message": id}),
        )
    }

    async fn involved_tasks(&self, conflict: &Conflict) -> Vec<CoordinatedTask> {
        let mut tasks = Vec::new();
        for id in &conflict.involved_tasks {
            if let Some(task) = self.graph.get_task(*id).await {
                tasks.push(task);
            }
        }
        tasks
    }

    /// One full detect-and-resolve pass.
    pub async fn run_pass(&self) -> MonitorReport {
        let started = std::time::Instant::now();
        let conflicts = self.detect_conflicts().await;

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut resolved = 0;
        for conflict in &conflicts {
            *by_type
                .entry(conflict.conflict_type.as_str().to_string())
                .or_insert(0) += 1;
            let outcome = self.resolve(conflict).await;
            if outcome.status == ConflictStatus::Resolved {
                resolved += 1;
            }
        }

        MonitorReport {
            detected: conflicts.len(),
            resolved,
            by_type,
            elapsed_ms: started.elapsed().as_millis(),
        }
    }

    /// Start the background monitor loop. Fails if already running.
    pub async fn start(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return Err(Error::MonitorAlreadyRunning);
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            qlog!("conflict: monitor started ({}s interval)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let report = engine.run_pass().await;
                        if report.detected > 0 {
                            qlog!(
                                "conflict: pass detected={} resolved={} ({}ms)",
                                report.detected,
                                report.resolved,
                                report.elapsed_ms
                            );
                        }
                    }
                }
            }
            qlog!("conflict: monitor stopped");
        });

        *monitor = Some(MonitorHandle { token, handle });
        Ok(())
    }

    /// Stop the monitor and wait for the loop to exit. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let handle = self.monitor.lock().await.take();
        if let Some(MonitorHandle { token, handle }) = handle {
            token.cancel();
            handle.await.map_err(|e| Error::TaskJoin(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor.lock().await.is_some()
    }

    pub async fn detection_history(&self) -> Vec<Conflict> {
        self.detection_history.lock().await.clone()
    }

    pub async fn resolution_history(&self) -> Vec<Conflict> {
        self.resolution_history.lock().await.clone()
    }
}

fn distinct_agents(tasks: &[&CoordinatedTask]) -> Vec<AgentId> {
    let mut seen = HashSet::new();
    let mut agents = Vec::new();
    for task in tasks {
        if let Some(agent) = &task.assigned_agent {
            if seen.insert(agent.clone()) {
                agents.push(agent.clone());
            }
        }
    }
    agents
}
