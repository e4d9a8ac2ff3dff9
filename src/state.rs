//! Request state machine.
//!
//! Every mutation of a request goes through the same steps: take the
//! request's lock, load a consistent view, stage task transitions on a
//! [`RequestChange`], then [`RequestStateMachine::commit`] it. The commit
//! derives the request status from the staged tasks and writes everything in
//! one compare-and-swap.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{OrchestratorError, Result};
use crate::status::RequestSnapshot;
use crate::store::{CommitOutcome, OrchestratorStore, RequestCommit, TaskUpdate};
use crate::task::{
    aggregate_status, RequestId, RequestRecord, RequestStatus, TaskError, TaskId, TaskRecord,
    TaskStatus, TaskTransition,
};

/// Exclusive access to one request.
pub struct RequestGuard {
    request_id: RequestId,
    _guard: OwnedMutexGuard<()>,
}

impl RequestGuard {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

#[derive(Default)]
struct RequestLocks {
    locks: StdMutex<HashMap<RequestId, Arc<Mutex<()>>>>,
}

impl RequestLocks {
    fn entry(&self, id: RequestId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id)
            .or_default()
            .clone()
    }

    fn forget(&self, id: RequestId) {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A request and its tasks as read under the request lock.
#[derive(Debug, Clone)]
pub struct RequestView {
    pub request: RequestRecord,
    pub tasks: Vec<TaskRecord>,
}

impl RequestView {
    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Start staging changes stamped with `now`.
    pub fn begin(self, now: DateTime<Utc>) -> RequestChange {
        let original = self.tasks.iter().map(|t| (t.id, t.status)).collect();
        RequestChange {
            base: self.request,
            original,
            tasks: self.tasks,
            touched: BTreeSet::new(),
            transitions: Vec::new(),
            now,
        }
    }
}

/// Task transitions staged against one loaded request.
#[derive(Debug)]
pub struct RequestChange {
    base: RequestRecord,
    original: HashMap<TaskId, TaskStatus>,
    tasks: Vec<TaskRecord>,
    touched: BTreeSet<usize>,
    transitions: Vec<TaskTransition>,
    now: DateTime<Utc>,
}

impl RequestChange {
    pub fn request(&self) -> &RequestRecord {
        &self.base
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.task(id).map(|t| t.status)
    }

    /// Queued tasks whose dependencies have all succeeded, in topological order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .filter(|t| {
                t.depends_on
                    .iter()
                    .all(|dep| self.status_of(*dep) == Some(TaskStatus::Success))
            })
            .map(|t| t.id)
            .collect()
    }

    /// When a task became ready: the later of its creation and its last
    /// dependency finishing.
    pub fn ready_since(&self, id: TaskId) -> Option<DateTime<Utc>> {
        let task = self.task(id)?;
        let mut since = task.created_at;
        for dep in &task.depends_on {
            if let Some(finished) = self.task(*dep).and_then(|d| d.finished_at) {
                since = since.max(finished);
            }
        }
        Some(since)
    }

    /// Transitive dependents of `id`, in topological order.
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut reached: BTreeSet<TaskId> = BTreeSet::from([id]);
        let mut found = Vec::new();
        // Tasks are stored in topological order, so one forward pass suffices.
        for task in &self.tasks {
            if task.depends_on.iter().any(|dep| reached.contains(dep)) {
                reached.insert(task.id);
                found.push(task.id);
            }
        }
        found
    }

    /// Apply one transition to a task. On error the task is left untouched.
    pub fn apply<F>(&mut self, id: TaskId, f: F) -> Result<&TaskTransition>
    where
        F: FnOnce(&mut TaskRecord, DateTime<Utc>) -> std::result::Result<TaskTransition, TaskError>,
    {
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(OrchestratorError::UnknownTask(id))?;
        let mut staged = self.tasks[index].clone();
        let transition = f(&mut staged, self.now)?;
        self.tasks[index] = staged;
        self.touched.insert(index);
        self.transitions.push(transition);
        Ok(&self.transitions[self.transitions.len() - 1])
    }
}

/// Owns request locks and the commit protocol.
pub struct RequestStateMachine {
    store: Arc<dyn OrchestratorStore>,
    locks: RequestLocks,
}

impl RequestStateMachine {
    pub fn new(store: Arc<dyn OrchestratorStore>) -> Self {
        Self {
            store,
            locks: RequestLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn OrchestratorStore> {
        &self.store
    }

    pub async fn lock(&self, id: RequestId) -> RequestGuard {
        let guard = self.locks.entry(id).lock_owned().await;
        RequestGuard {
            request_id: id,
            _guard: guard,
        }
    }

    /// Lock the request only if nobody else holds it.
    pub fn try_lock(&self, id: RequestId) -> Option<RequestGuard> {
        let guard = self.locks.entry(id).try_lock_owned().ok()?;
        Some(RequestGuard {
            request_id: id,
            _guard: guard,
        })
    }

    /// Persist a freshly compiled request in its initial state.
    pub async fn create(&self, request: &RequestRecord, tasks: &[TaskRecord]) -> Result<()> {
        self.store
            .create_request(request, tasks)
            .await
            .map_err(OrchestratorError::Store)
    }

    pub async fn load(&self, guard: &RequestGuard) -> Result<RequestView> {
        let id = guard.request_id;
        let loaded = self
            .store
            .load_request(id)
            .await
            .map_err(OrchestratorError::Store)?;
        let Some((request, tasks)) = loaded else {
            self.locks.forget(id);
            return Err(OrchestratorError::not_found("Request", id));
        };
        // Terminal requests never change again.
        if request.status.is_terminal() {
            self.locks.forget(id);
        }
        Ok(RequestView { request, tasks })
    }

    /// Commit staged transitions and the recomputed request status.
    ///
    /// Returns the request as stored afterwards. A change with no
    /// transitions writes nothing.
    pub async fn commit(&self, guard: &RequestGuard, change: RequestChange) -> Result<RequestRecord> {
        let RequestChange {
            base,
            original,
            tasks,
            touched,
            transitions,
            now,
        } = change;

        if base.id != guard.request_id {
            return Err(OrchestratorError::Conflict(format!(
                "{} (locked {})",
                base.id, guard.request_id
            )));
        }
        if transitions.is_empty() {
            return Ok(base);
        }
        if base.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!(
                "{} is already {}",
                base.id, base.status
            )));
        }

        let (status, terminal_reason) = aggregate_status(&tasks);
        if !base.status.can_advance_to(status) {
            return Err(OrchestratorError::Conflict(format!(
                "{} cannot move from {} to {}",
                base.id, base.status, status
            )));
        }

        let mut request = base.clone();
        request.status = status;
        request.terminal_reason = terminal_reason;
        request.updated_at = now;
        request.version = base.version + 1;

        let updates = touched
            .into_iter()
            .map(|index| {
                let record = tasks[index].clone();
                let expected = original
                    .get(&record.id)
                    .copied()
                    .unwrap_or(record.status);
                TaskUpdate { record, expected }
            })
            .collect();

        let commit = RequestCommit {
            request: request.clone(),
            expected_version: base.version,
            tasks: updates,
            transitions,
        };
        match self
            .store
            .commit(&commit)
            .await
            .map_err(OrchestratorError::Store)?
        {
            CommitOutcome::Committed => {}
            CommitOutcome::Conflict => {
                tracing::warn!("Commit conflict on request {} at version {}", base.id, base.version);
                return Err(OrchestratorError::Conflict(base.id.to_string()));
            }
        }

        for transition in &commit.transitions {
            tracing::debug!(
                "Task {} of request {}: {} -> {}",
                transition.task_id,
                transition.request_id,
                transition.from,
                transition.to
            );
        }
        if status != base.status {
            match terminal_reason {
                Some(reason) => tracing::info!(
                    "Request {}: {} -> {} ({})",
                    request.id,
                    base.status,
                    status,
                    reason.as_str()
                ),
                None => tracing::info!("Request {}: {} -> {}", request.id, base.status, status),
            }
        }
        if status.is_terminal() {
            self.locks.forget(request.id);
        }
        Ok(request)
    }

    /// Consistent point-in-time snapshot of a request. Never takes the lock.
    pub async fn get_status(&self, id: RequestId) -> Result<RequestSnapshot> {
        let (request, tasks) = self
            .store
            .load_request(id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or_else(|| OrchestratorError::not_found("Request", id))?;
        Ok(RequestSnapshot::new(&request, &tasks))
    }
}
