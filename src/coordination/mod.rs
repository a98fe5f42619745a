//! Coordination layer: messaging, resource arbitration, the task
//! graph, priority management, conflict detection/resolution, and the
//! coordinator façade that ties them together.

pub mod arbiter;
pub mod bus;
pub mod conflict;
pub mod coordinator;
pub mod graph;
pub mod message;
pub mod priority;
