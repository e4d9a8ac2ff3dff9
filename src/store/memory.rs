//! In-memory store (non-persistent).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CommitOutcome, OrchestratorStore, RequestCommit, RequestFilter};
use crate::evidence::{Evidence, EvidenceId};
use crate::task::{RequestId, RequestRecord, RequestStatus, TaskId, TaskRecord, TaskStatus, TaskTransition};

#[derive(Default)]
struct State {
    evidence: HashMap<EvidenceId, Evidence>,
    requests: HashMap<RequestId, RequestRecord>,
    tasks: HashMap<TaskId, TaskRecord>,
    history: HashMap<TaskId, Vec<TaskTransition>>,
}

/// All tables live behind one lock so every read is a consistent snapshot.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrchestratorStore for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn insert_evidence(&self, evidence: &Evidence) -> Result<Evidence, String> {
        let mut state = self.state.write().await;
        Ok(state
            .evidence
            .entry(evidence.id.clone())
            .or_insert_with(|| evidence.clone())
            .clone())
    }

    async fn get_evidence(&self, id: &EvidenceId) -> Result<Option<Evidence>, String> {
        Ok(self.state.read().await.evidence.get(id).cloned())
    }

    async fn create_request(
        &self,
        request: &RequestRecord,
        tasks: &[TaskRecord],
    ) -> Result<(), String> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id) {
            return Err(format!("Request {} already exists", request.id));
        }
        if !state.evidence.contains_key(&request.evidence_id) {
            return Err(format!("Evidence {} not found", request.evidence_id));
        }
        state.requests.insert(request.id, request.clone());
        for task in tasks {
            state.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn load_request(
        &self,
        id: RequestId,
    ) -> Result<Option<(RequestRecord, Vec<TaskRecord>)>, String> {
        let state = self.state.read().await;
        let Some(request) = state.requests.get(&id) else {
            return Ok(None);
        };
        let tasks = request
            .task_ids
            .iter()
            .map(|task_id| {
                state
                    .tasks
                    .get(task_id)
                    .cloned()
                    .ok_or_else(|| format!("Task {} of request {} missing", task_id, id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some((request.clone(), tasks)))
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, String> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestRecord>, String> {
        let mut requests: Vec<RequestRecord> = self
            .state
            .read()
            .await
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_request_ids_by_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<RequestId>, String> {
        let state = self.state.read().await;
        let mut matching: Vec<&RequestRecord> = state
            .requests
            .values()
            .filter(|r| statuses.contains(&r.status))
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching.into_iter().map(|r| r.id).collect())
    }

    async fn list_tasks_by_status(
        &self,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRecord>, String> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect())
    }

    async fn commit(&self, commit: &RequestCommit) -> Result<CommitOutcome, String> {
        let mut state = self.state.write().await;

        let Some(current) = state.requests.get(&commit.request.id) else {
            return Err(format!("Request {} not found", commit.request.id));
        };
        if current.version != commit.expected_version {
            return Ok(CommitOutcome::Conflict);
        }
        for update in &commit.tasks {
            match state.tasks.get(&update.record.id) {
                Some(task) if task.status == update.expected => {}
                Some(_) => return Ok(CommitOutcome::Conflict),
                None => return Err(format!("Task {} not found", update.record.id)),
            }
        }

        state
            .requests
            .insert(commit.request.id, commit.request.clone());
        for update in &commit.tasks {
            state.tasks.insert(update.record.id, update.record.clone());
        }
        for transition in &commit.transitions {
            state
                .history
                .entry(transition.task_id)
                .or_default()
                .push(transition.clone());
        }
        Ok(CommitOutcome::Committed)
    }

    async fn task_history(&self, id: TaskId) -> Result<Vec<TaskTransition>, String> {
        Ok(self
            .state
            .read()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}
