//! Worker capacity bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex as StdMutex;

use super::WorkerId;
use crate::task::TaskId;

#[derive(Debug, Clone)]
struct Slot {
    capacity: usize,
    registered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PoolState {
    workers: BTreeMap<WorkerId, Slot>,
    /// In-flight tasks per worker. Kept while a worker is deregistered so
    /// the assignments are still there when it comes back.
    assigned: BTreeMap<WorkerId, BTreeSet<TaskId>>,
    owner: HashMap<TaskId, WorkerId>,
}

impl PoolState {
    fn load(&self, worker: &WorkerId) -> usize {
        self.assigned.get(worker).map_or(0, BTreeSet::len)
    }

    fn spare(&self, worker: &WorkerId, slot: &Slot) -> usize {
        slot.capacity.saturating_sub(self.load(worker))
    }

    fn assign(&mut self, task_id: TaskId, worker: WorkerId) {
        if let Some(previous) = self.owner.insert(task_id, worker.clone()) {
            if let Some(tasks) = self.assigned.get_mut(&previous) {
                tasks.remove(&task_id);
            }
        }
        self.assigned.entry(worker).or_default().insert(task_id);
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub capacity: usize,
    pub in_flight: usize,
    pub registered_at: DateTime<Utc>,
}

/// Registered workers and the tasks each one holds.
///
/// Only capacity is tracked here; task status lives in the store.
#[derive(Debug, Default)]
pub struct WorkerPool {
    state: StdMutex<PoolState>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a worker, or update the capacity of a known one.
    pub fn register(&self, id: WorkerId, capacity: usize) -> WorkerInfo {
        let mut state = self.state();
        let now = Utc::now();
        let slot = state
            .workers
            .entry(id.clone())
            .and_modify(|slot| slot.capacity = capacity)
            .or_insert(Slot {
                capacity,
                registered_at: now,
            })
            .clone();
        WorkerInfo {
            in_flight: state.load(&id),
            id,
            capacity: slot.capacity,
            registered_at: slot.registered_at,
        }
    }

    /// Remove a worker. Its in-flight tasks stay recorded against it.
    pub fn deregister(&self, id: &WorkerId) -> bool {
        self.state().workers.remove(id).is_some()
    }

    pub fn is_registered(&self, id: &WorkerId) -> bool {
        self.state().workers.contains_key(id)
    }

    /// Whether any registered worker could take another task.
    pub fn has_capacity(&self) -> bool {
        let state = self.state();
        state
            .workers
            .iter()
            .any(|(id, slot)| state.spare(id, slot) > 0)
    }

    /// Reserve a slot for `task_id` on the worker with the most spare
    /// capacity (ties go to the lowest id).
    pub fn reserve(&self, task_id: TaskId) -> Option<WorkerId> {
        let mut state = self.state();
        let mut best: Option<(&WorkerId, usize)> = None;
        for (id, slot) in &state.workers {
            let spare = state.spare(id, slot);
            if spare > 0 && best.map_or(true, |(_, most)| spare > most) {
                best = Some((id, spare));
            }
        }
        let worker = best.map(|(id, _)| id.clone())?;
        state.assign(task_id, worker.clone());
        Some(worker)
    }

    /// Free the slot held by `task_id`, returning the worker that held it.
    pub fn release(&self, task_id: TaskId) -> Option<WorkerId> {
        let mut state = self.state();
        let worker = state.owner.remove(&task_id)?;
        if let Some(tasks) = state.assigned.get_mut(&worker) {
            tasks.remove(&task_id);
            if tasks.is_empty() {
                state.assigned.remove(&worker);
            }
        }
        Some(worker)
    }

    /// Re-record an assignment read back from the store.
    pub fn restore(&self, task_id: TaskId, worker: WorkerId) {
        self.state().assign(task_id, worker);
    }

    pub fn tasks_of(&self, worker: &WorkerId) -> Vec<TaskId> {
        self.state()
            .assigned
            .get(worker)
            .map(|tasks| tasks.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        let state = self.state();
        state
            .workers
            .iter()
            .map(|(id, slot)| WorkerInfo {
                id: id.clone(),
                capacity: slot.capacity,
                in_flight: state.load(id),
                registered_at: slot.registered_at,
            })
            .collect()
    }
}
