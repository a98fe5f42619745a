//! Core data model shared by every coordination component.

pub mod task;
