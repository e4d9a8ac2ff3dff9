//! Error taxonomy for the orchestration engine.

use thiserror::Error;

use crate::recipe::RecipeError;
use crate::task::{TaskId, TaskStatus};

/// Errors surfaced by orchestrator operations.
///
/// Validation and recipe errors are raised before any task exists, so the
/// caller can always resubmit corrected input. Store errors wrap the backend's
/// message verbatim.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Recipe error: {0}")]
    Recipe(#[from] RecipeError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Unknown task {0}")]
    UnknownTask(TaskId),

    #[error("Invalid transition for task {task_id} from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("No worker capacity available")]
    WorkerUnavailable,

    #[error("Concurrent update conflict on request {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl OrchestratorError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
