//! Task module - defines tasks, requests, and their state machines.
//!
//! This module is designed with formal verification in mind:
//! - All types use algebraic data types with exhaustive matching
//! - Transitions are explicit methods that reject invalid moves
//! - Request status is a pure function of task statuses

pub mod request;
pub mod task;

pub use request::{aggregate_status, RequestId, RequestRecord, RequestStatus, TerminalReason};
pub use task::{FailureReason, TaskError, TaskId, TaskRecord, TaskStatus, TaskTransition};
