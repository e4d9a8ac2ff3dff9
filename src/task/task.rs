//! Core Task type and its forward-only status transitions.
//!
//! # Invariants
//! - A task only moves forward through `Queued -> Dispatched -> Running -> {Success|Failure}`
//! - The only jumps are terminal: propagated failure and dispatch timeout
//!   (`Queued -> Failure`) and cancellation (any non-terminal state -> `Cancelled`)
//! - Terminal tasks never change again

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::request::RequestId;
use crate::dispatch::WorkerId;
use crate::evidence::EvidenceId;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Queued -> Dispatched -> Running -> Success
///      \                        \-> Failure
///       \-> Failure (upstream failed / dispatch timeout)
/// (any non-terminal) -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Dispatched,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Dispatched,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failure,
        TaskStatus::Cancelled,
    ];

    /// `true` if the task is Success, Failure, or Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancelled
        )
    }

    /// `true` if the task holds a worker slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Dispatched | TaskStatus::Running)
    }

    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        match self {
            TaskStatus::Queued => matches!(
                target,
                TaskStatus::Dispatched | TaskStatus::Failure | TaskStatus::Cancelled
            ),
            TaskStatus::Dispatched => {
                matches!(target, TaskStatus::Running | TaskStatus::Cancelled)
            }
            TaskStatus::Running => matches!(
                target,
                TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancelled
            ),
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{}'", s))
    }
}

/// Why a task ended in `Failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The worker reported the failure.
    Reported,
    /// A task this one depends on (directly or transitively) failed.
    UpstreamFailed { task_id: TaskId, task_type: String },
    /// No worker capacity was available within the dispatch timeout.
    DispatchTimeout,
}

impl FailureReason {
    pub fn describe(&self) -> String {
        match self {
            FailureReason::Reported => "task reported failure".to_string(),
            FailureReason::UpstreamFailed { task_type, task_id } => {
                format!("upstream task {} ({}) failed", task_type, task_id)
            }
            FailureReason::DispatchTimeout => {
                "no worker capacity within dispatch timeout".to_string()
            }
        }
    }
}

/// One recorded status change of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A unit of analysis work bound to one evidence item.
///
/// Fields other than the status block are fixed at compile time. Status
/// fields change only through the transition methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub request_id: RequestId,
    pub task_type: String,
    pub evidence_id: EvidenceId,
    /// Opaque options handed to the worker verbatim.
    pub config: Map<String, Value>,
    pub depends_on: Vec<TaskId>,
    /// Index in the request's topological order.
    pub position: usize,
    pub status: TaskStatus,
    pub assigned_worker: Option<WorkerId>,
    pub result_payload: Option<Value>,
    pub failure_reason: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    fn transition(
        &mut self,
        to: TaskStatus,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<TaskTransition, TaskError> {
        if !self.status.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        let from = self.status;
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(TaskTransition {
            task_id: self.id,
            request_id: self.request_id,
            from,
            to,
            at,
            reason,
        })
    }

    /// Assign the task to a worker.
    ///
    /// # Precondition
    /// `self.status == Queued`
    pub fn dispatch(
        &mut self,
        worker: WorkerId,
        at: DateTime<Utc>,
    ) -> Result<TaskTransition, TaskError> {
        if self.status != TaskStatus::Queued {
            return Err(self.invalid(TaskStatus::Dispatched));
        }
        let transition =
            self.transition(TaskStatus::Dispatched, at, Some(format!("worker {}", worker)))?;
        self.assigned_worker = Some(worker);
        self.dispatched_at = Some(at);
        Ok(transition)
    }

    /// Record that the worker began executing.
    ///
    /// # Precondition
    /// `self.status == Dispatched`
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<TaskTransition, TaskError> {
        if self.status != TaskStatus::Dispatched {
            return Err(self.invalid(TaskStatus::Running));
        }
        let transition = self.transition(TaskStatus::Running, at, None)?;
        self.started_at = Some(at);
        Ok(transition)
    }

    /// # Precondition
    /// `self.status == Running`
    pub fn succeed(
        &mut self,
        payload: Option<Value>,
        at: DateTime<Utc>,
    ) -> Result<TaskTransition, TaskError> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid(TaskStatus::Success));
        }
        let transition = self.transition(TaskStatus::Success, at, None)?;
        self.result_payload = payload;
        Ok(transition)
    }

    /// # Precondition
    /// `self.status == Running`
    pub fn fail(
        &mut self,
        payload: Option<Value>,
        at: DateTime<Utc>,
    ) -> Result<TaskTransition, TaskError> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid(TaskStatus::Failure));
        }
        let transition = self.transition(
            TaskStatus::Failure,
            at,
            Some(FailureReason::Reported.describe()),
        )?;
        self.result_payload = payload;
        self.failure_reason = Some(FailureReason::Reported);
        Ok(transition)
    }

    /// Fail a task that never ran because of `reason`.
    ///
    /// # Precondition
    /// `self.status == Queued` and `reason` is not `Reported`
    pub fn fail_unexecuted(
        &mut self,
        reason: FailureReason,
        at: DateTime<Utc>,
    ) -> Result<TaskTransition, TaskError> {
        if self.status != TaskStatus::Queued || reason == FailureReason::Reported {
            return Err(self.invalid(TaskStatus::Failure));
        }
        let transition = self.transition(TaskStatus::Failure, at, Some(reason.describe()))?;
        self.failure_reason = Some(reason);
        Ok(transition)
    }

    /// # Precondition
    /// `!self.status.is_terminal()`
    pub fn cancel(
        &mut self,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<TaskTransition, TaskError> {
        self.transition(TaskStatus::Cancelled, at, reason)
    }

    fn invalid(&self, to: TaskStatus) -> TaskError {
        TaskError::InvalidTransition {
            task_id: self.id,
            from: self.status,
            to,
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid state transition for task {task_id} from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl From<TaskError> for crate::error::OrchestratorError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::InvalidTransition { task_id, from, to } => {
                crate::error::OrchestratorError::InvalidTransition { task_id, from, to }
            }
        }
    }
}
