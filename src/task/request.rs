//! Request records and the status aggregation rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{FailureReason, TaskId, TaskRecord, TaskStatus};
use crate::evidence::EvidenceId;

/// Globally unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Request lifecycle status.
///
/// # State Machine
/// ```text
/// Queued -> Running -> Successful
///      \           \-> Failed
///       \-> Failed (cancelled or timed out before any dispatch)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Running,
    Successful,
    Failed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 4] = [
        RequestStatus::Queued,
        RequestStatus::Running,
        RequestStatus::Successful,
        RequestStatus::Failed,
    ];

    pub const ACTIVE: [RequestStatus; 2] = [RequestStatus::Queued, RequestStatus::Running];

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Successful | RequestStatus::Failed)
    }

    /// Whether moving to `next` keeps the status monotonic.
    pub fn can_advance_to(&self, next: RequestStatus) -> bool {
        match self {
            RequestStatus::Queued => next != RequestStatus::Successful,
            RequestStatus::Running => next != RequestStatus::Queued,
            RequestStatus::Successful | RequestStatus::Failed => *self == next,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Running => "running",
            RequestStatus::Successful => "successful",
            RequestStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown request status '{}'", s))
    }
}

/// Why a request ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    TaskFailed,
    Cancelled,
    DispatchTimeout,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::TaskFailed => "task_failed",
            TerminalReason::Cancelled => "cancelled",
            TerminalReason::DispatchTimeout => "dispatch_timeout",
        }
    }
}

impl std::str::FromStr for TerminalReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_failed" => Ok(TerminalReason::TaskFailed),
            "cancelled" => Ok(TerminalReason::Cancelled),
            "dispatch_timeout" => Ok(TerminalReason::DispatchTimeout),
            other => Err(format!("unknown terminal reason '{}'", other)),
        }
    }
}

/// The aggregate unit submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub evidence_id: EvidenceId,
    pub recipe_name: String,
    pub status: RequestStatus,
    pub terminal_reason: Option<TerminalReason>,
    pub requester: String,
    pub reason: Option<String>,
    /// Owned tasks in topological order.
    pub task_ids: Vec<TaskId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed change; used for compare-and-swap.
    pub version: u64,
}

/// Derive request status from the statuses of its tasks.
///
/// - `Successful` iff every task is `Success`
/// - `Failed` iff some task is `Failure`/`Cancelled` and none is still queued or in flight
/// - `Queued` while every task is still `Queued`
/// - `Running` otherwise
pub fn aggregate_status(tasks: &[TaskRecord]) -> (RequestStatus, Option<TerminalReason>) {
    if tasks.is_empty() {
        return (RequestStatus::Queued, None);
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Success) {
        return (RequestStatus::Successful, None);
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Queued) {
        return (RequestStatus::Queued, None);
    }

    if tasks.iter().any(|t| !t.status.is_terminal()) {
        return (RequestStatus::Running, None);
    }

    let reason = if tasks.iter().any(|t| t.status == TaskStatus::Cancelled) {
        TerminalReason::Cancelled
    } else if tasks
        .iter()
        .any(|t| t.failure_reason == Some(FailureReason::DispatchTimeout))
    {
        TerminalReason::DispatchTimeout
    } else {
        TerminalReason::TaskFailed
    };
    (RequestStatus::Failed, Some(reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::WorkerId;
    use crate::task::task::tests::queued_task;

    fn with_status(status: TaskStatus) -> TaskRecord {
        let mut task = queued_task("FsstatTask");
        let now = Utc::now();
        match status {
            TaskStatus::Queued => {}
            TaskStatus::Dispatched => {
                task.dispatch(WorkerId::from("w"), now).unwrap();
            }
            TaskStatus::Running => {
                task.dispatch(WorkerId::from("w"), now).unwrap();
                task.start(now).unwrap();
            }
            TaskStatus::Success => {
                task.dispatch(WorkerId::from("w"), now).unwrap();
                task.start(now).unwrap();
                task.succeed(None, now).unwrap();
            }
            TaskStatus::Failure => {
                task.dispatch(WorkerId::from("w"), now).unwrap();
                task.start(now).unwrap();
                task.fail(None, now).unwrap();
            }
            TaskStatus::Cancelled => {
                task.cancel(None, now).unwrap();
            }
        }
        task
    }

    #[test]
    fn test_all_success_is_successful() {
        let tasks = vec![with_status(TaskStatus::Success), with_status(TaskStatus::Success)];
        assert_eq!(aggregate_status(&tasks), (RequestStatus::Successful, None));
    }

    #[test]
    fn test_all_queued_is_queued() {
        let tasks = vec![with_status(TaskStatus::Queued), with_status(TaskStatus::Queued)];
        assert_eq!(aggregate_status(&tasks).0, RequestStatus::Queued);
    }

    #[test]
    fn test_failure_with_live_sibling_keeps_running() {
        let tasks = vec![with_status(TaskStatus::Failure), with_status(TaskStatus::Running)];
        assert_eq!(aggregate_status(&tasks), (RequestStatus::Running, None));

        let tasks = vec![with_status(TaskStatus::Failure), with_status(TaskStatus::Queued)];
        assert_eq!(aggregate_status(&tasks), (RequestStatus::Running, None));
    }

    #[test]
    fn test_failure_once_everything_resolved() {
        let tasks = vec![with_status(TaskStatus::Failure), with_status(TaskStatus::Success)];
        assert_eq!(
            aggregate_status(&tasks),
            (RequestStatus::Failed, Some(TerminalReason::TaskFailed))
        );
    }

    #[test]
    fn test_cancelled_reason_wins() {
        let tasks = vec![with_status(TaskStatus::Cancelled), with_status(TaskStatus::Failure)];
        assert_eq!(
            aggregate_status(&tasks),
            (RequestStatus::Failed, Some(TerminalReason::Cancelled))
        );
    }

    #[test]
    fn test_timeout_reason() {
        let mut task = queued_task("FsstatTask");
        task.fail_unexecuted(FailureReason::DispatchTimeout, Utc::now())
            .unwrap();
        assert_eq!(
            aggregate_status(&[task]),
            (RequestStatus::Failed, Some(TerminalReason::DispatchTimeout))
        );
    }

    #[test]
    fn test_in_flight_is_running() {
        let tasks = vec![with_status(TaskStatus::Dispatched), with_status(TaskStatus::Queued)];
        assert_eq!(aggregate_status(&tasks).0, RequestStatus::Running);
    }

    #[test]
    fn test_monotonic_advance() {
        use RequestStatus::*;
        assert!(Queued.can_advance_to(Running));
        assert!(Queued.can_advance_to(Failed));
        assert!(!Queued.can_advance_to(Successful));
        assert!(Running.can_advance_to(Successful));
        assert!(!Running.can_advance_to(Queued));
        assert!(!Successful.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Running));
    }
}
