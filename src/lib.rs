//! # Evidence Orchestrator
//!
//! Request/task orchestration for distributed evidence processing.
//!
//! A client submits a piece of evidence together with a recipe. The recipe
//! compiles into a dependency graph of typed tasks, the dispatcher hands ready
//! tasks to registered workers, and workers report back until every task of
//! the request is terminal.
//!
//! ```text
//!   submit ──► EvidenceRegistry ──► RecipeCompiler ──► RequestStateMachine
//!                                                         ▲        │
//!                                     report_outcome      │        ▼
//!   Worker ◄── assignments ◄── Dispatcher ◄── Scheduler ──┘    StatusApi ──► poll
//! ```
//!
//! ## Modules
//! - `evidence`: evidence kinds, validation and content-derived ids
//! - `recipe`: recipe documents, enabled jobs and graph compilation
//! - `task`: request and task records with their transition rules
//! - `state`: serialised, compare-and-swap commits per request
//! - `dispatch`: worker pool and task assignment
//! - `status`: read-only snapshots and statistics
//! - `store`: in-memory and SQLite persistence
//! - `api`: HTTP surface

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evidence;
pub mod orchestrator;
pub mod recipe;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod store;
pub mod task;
pub mod worker;

pub use config::Config;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Orchestrator, OrchestratorOptions, Submission};
