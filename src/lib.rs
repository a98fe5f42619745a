pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;

// Coordination layer
pub mod coordination;

pub use agent::{Agent, AgentId};
pub use config::Config;
pub use coordination::arbiter::{AccessOutcome, ResourceArbiter};
pub use coordination::bus::{BusMetrics, MessageBus};
pub use coordination::conflict::{
    Conflict, ConflictEngine, ConflictId, ConflictStatus, ConflictType, MonitorReport,
    ResolutionStrategy,
};
pub use coordination::coordinator::{
    ContentionOutcome, CoordinationStatus, ResourceConflictReport, TaskCoordinator,
};
pub use coordination::graph::{GraphMetrics, TaskGraph};
pub use coordination::message::{AgentMessage, MessageId, MessageType};
pub use coordination::priority::{PriorityAnalysis, PriorityManager};
pub use crate::core::task::{
    CoordinatedTask, DependencyKind, Priority, TaskDependency, TaskId, TaskStatus,
};
pub use error::{Error, Result};
