//! Task dispatch: assigning ready tasks to workers and applying their reports.

mod pool;

pub use pool::{WorkerInfo, WorkerPool};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::{OrchestratorError, Result};
use crate::evidence::Evidence;
use crate::state::{RequestChange, RequestGuard, RequestStateMachine};
use crate::task::{FailureReason, RequestId, RequestStatus, TaskId, TaskStatus};

/// Identifier a worker registers under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status a worker may report for a task it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Running,
    Success,
    Failure,
}

impl ReportedStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportedStatus::Running)
    }
}

/// A worker's report about one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub status: ReportedStatus,
    #[serde(default)]
    pub result_payload: Option<Value>,
}

impl WorkerReport {
    pub fn running() -> Self {
        Self {
            status: ReportedStatus::Running,
            result_payload: None,
        }
    }

    pub fn success(payload: Option<Value>) -> Self {
        Self {
            status: ReportedStatus::Success,
            result_payload: payload,
        }
    }

    pub fn failure(payload: Option<Value>) -> Self {
        Self {
            status: ReportedStatus::Failure,
            result_payload: payload,
        }
    }
}

/// What happened to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportDisposition {
    Applied,
    /// The task was cancelled; the report was accepted and dropped.
    Discarded,
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub dispatched: Vec<(TaskId, WorkerId)>,
    /// Requests skipped because another operation held them.
    pub busy: usize,
}

/// Everything a worker needs to execute a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub task_type: String,
    pub status: TaskStatus,
    pub config: Map<String, Value>,
    pub evidence: Evidence,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Assigns ready tasks to workers and applies worker reports.
pub struct Dispatcher {
    state: Arc<RequestStateMachine>,
    pool: WorkerPool,
    notify: Arc<Notify>,
    dispatch_timeout: chrono::Duration,
}

impl Dispatcher {
    pub fn new(
        state: Arc<RequestStateMachine>,
        notify: Arc<Notify>,
        dispatch_timeout: std::time::Duration,
    ) -> Self {
        Self {
            state,
            pool: WorkerPool::new(),
            notify,
            dispatch_timeout: chrono::Duration::from_std(dispatch_timeout)
                .unwrap_or_else(|_| chrono::Duration::days(36500)),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Wake the scheduler loop.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Rebuild in-flight assignments from persisted `dispatched`/`running` tasks.
    pub async fn recover(&self) -> Result<usize> {
        let in_flight = self
            .state
            .store()
            .list_tasks_by_status(&[TaskStatus::Dispatched, TaskStatus::Running])
            .await
            .map_err(OrchestratorError::Store)?;
        let mut restored = 0;
        for task in in_flight {
            if let Some(worker) = task.assigned_worker {
                self.pool.restore(task.id, worker);
                restored += 1;
            }
        }
        if restored > 0 {
            tracing::info!("Restored {} in-flight task assignments", restored);
        }
        Ok(restored)
    }

    pub fn register_worker(&self, id: WorkerId, capacity: usize) -> Result<WorkerInfo> {
        if capacity == 0 {
            return Err(OrchestratorError::Validation(
                "worker capacity must be at least 1".to_string(),
            ));
        }
        if id.as_str().trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "worker id must not be empty".to_string(),
            ));
        }
        let info = self.pool.register(id, capacity);
        tracing::info!(
            "Worker {} registered with capacity {} ({} in flight)",
            info.id,
            info.capacity,
            info.in_flight
        );
        self.wake();
        Ok(info)
    }

    pub fn deregister_worker(&self, id: &WorkerId) -> Result<()> {
        if !self.pool.deregister(id) {
            return Err(OrchestratorError::not_found("Worker", id));
        }
        tracing::info!("Worker {} deregistered", id);
        Ok(())
    }

    /// In-flight tasks currently held by a worker.
    pub async fn assignments(&self, worker: &WorkerId) -> Result<Vec<TaskAssignment>> {
        if !self.pool.is_registered(worker) {
            return Err(OrchestratorError::not_found("Worker", worker));
        }
        let store = self.state.store();
        let mut assignments = Vec::new();
        for task_id in self.pool.tasks_of(worker) {
            let Some(task) = store.get_task(task_id).await.map_err(OrchestratorError::Store)?
            else {
                continue;
            };
            if !task.status.is_in_flight() || task.assigned_worker.as_ref() != Some(worker) {
                continue;
            }
            let evidence = store
                .get_evidence(&task.evidence_id)
                .await
                .map_err(OrchestratorError::Store)?
                .ok_or_else(|| OrchestratorError::not_found("Evidence", &task.evidence_id))?;
            assignments.push(TaskAssignment {
                task_id: task.id,
                request_id: task.request_id,
                task_type: task.task_type,
                status: task.status,
                config: task.config,
                evidence,
                dispatched_at: task.dispatched_at,
            });
        }
        Ok(assignments)
    }

    /// Assign every ready task of every active request that a worker has
    /// room for. Requests held by another operation are skipped until the
    /// next pass.
    pub async fn dispatch_ready_tasks(&self) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let active = self
            .state
            .store()
            .list_request_ids_by_status(&RequestStatus::ACTIVE)
            .await
            .map_err(OrchestratorError::Store)?;

        for request_id in active {
            if !self.pool.has_capacity() {
                break;
            }
            let Some(guard) = self.state.try_lock(request_id) else {
                report.busy += 1;
                continue;
            };
            match self.dispatch_request(&guard).await {
                Ok(dispatched) => report.dispatched.extend(dispatched),
                Err(OrchestratorError::Conflict(e)) => {
                    tracing::warn!("Dispatch conflict: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        if !report.dispatched.is_empty() {
            tracing::debug!("Dispatched {} tasks", report.dispatched.len());
        }
        Ok(report)
    }

    async fn dispatch_request(&self, guard: &RequestGuard) -> Result<Vec<(TaskId, WorkerId)>> {
        let view = self.state.load(guard).await?;
        if view.request.status.is_terminal() {
            return Ok(Vec::new());
        }
        let mut change = view.begin(Utc::now());
        let mut dispatched = Vec::new();

        for task_id in change.ready_tasks() {
            let worker = match self.reserve(task_id) {
                Ok(worker) => worker,
                Err(OrchestratorError::WorkerUnavailable) => break,
                Err(e) => {
                    self.release_all(&dispatched);
                    return Err(e);
                }
            };
            dispatched.push((task_id, worker.clone()));
            if let Err(e) = change.apply(task_id, |t, now| t.dispatch(worker, now)) {
                self.release_all(&dispatched);
                return Err(e);
            }
        }
        if dispatched.is_empty() {
            return Ok(dispatched);
        }

        match self.state.commit(guard, change).await {
            Ok(_) => {
                for (task_id, worker) in &dispatched {
                    tracing::info!("Task {} dispatched to worker {}", task_id, worker);
                }
                Ok(dispatched)
            }
            Err(e) => {
                self.release_all(&dispatched);
                Err(e)
            }
        }
    }

    /// Take a slot for `task_id` on the least loaded worker.
    fn reserve(&self, task_id: TaskId) -> Result<WorkerId> {
        self.pool
            .reserve(task_id)
            .ok_or(OrchestratorError::WorkerUnavailable)
    }

    fn release_all(&self, reserved: &[(TaskId, WorkerId)]) {
        for (task_id, _) in reserved {
            self.pool.release(*task_id);
        }
    }

    /// Apply a worker's report to a task.
    ///
    /// A terminal report on a task still marked `dispatched` records the
    /// `running` step first. A failure fails every queued descendant without
    /// running it. Reports for cancelled tasks are discarded.
    pub async fn report_outcome(
        &self,
        task_id: TaskId,
        report: WorkerReport,
    ) -> Result<ReportDisposition> {
        let task = self
            .state
            .store()
            .get_task(task_id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or(OrchestratorError::UnknownTask(task_id))?;

        let guard = self.state.lock(task.request_id).await;
        let view = self.state.load(&guard).await?;
        let current = view
            .task(task_id)
            .ok_or(OrchestratorError::UnknownTask(task_id))?
            .status;

        if current == TaskStatus::Cancelled {
            tracing::info!(
                "Discarding {:?} report for cancelled task {}",
                report.status,
                task_id
            );
            self.pool.release(task_id);
            return Ok(ReportDisposition::Discarded);
        }

        let mut change = view.begin(Utc::now());
        if let Err(e) = stage_report(&mut change, task_id, &report) {
            if matches!(e, OrchestratorError::InvalidTransition { .. }) {
                tracing::warn!("Rejected report for task {}: {}", task_id, e);
            }
            return Err(e);
        }
        self.state.commit(&guard, change).await?;
        drop(guard);

        if report.status.is_terminal() {
            self.pool.release(task_id);
            self.wake();
        }
        Ok(ReportDisposition::Applied)
    }

    /// Fail requests whose ready tasks have waited longer than the dispatch
    /// timeout while no worker had spare capacity. Returns how many requests
    /// were affected.
    pub async fn expire_starved(&self, now: DateTime<Utc>) -> Result<usize> {
        if self.pool.has_capacity() {
            return Ok(0);
        }
        let active = self
            .state
            .store()
            .list_request_ids_by_status(&RequestStatus::ACTIVE)
            .await
            .map_err(OrchestratorError::Store)?;

        let mut expired = 0;
        for request_id in active {
            let Some(guard) = self.state.try_lock(request_id) else {
                continue;
            };
            let view = self.state.load(&guard).await?;
            if view.request.status.is_terminal() {
                continue;
            }
            let mut change = view.begin(now);
            let starved = change.ready_tasks().into_iter().any(|id| {
                change
                    .ready_since(id)
                    .and_then(|since| since.checked_add_signed(self.dispatch_timeout))
                    .is_some_and(|deadline| deadline <= now)
            });
            if !starved {
                continue;
            }

            let queued: Vec<TaskId> = change
                .tasks()
                .iter()
                .filter(|t| t.status == TaskStatus::Queued)
                .map(|t| t.id)
                .collect();
            for id in queued {
                change.apply(id, |t, now| {
                    t.fail_unexecuted(FailureReason::DispatchTimeout, now)
                })?;
            }
            match self.state.commit(&guard, change).await {
                Ok(_) => {
                    tracing::warn!(
                        "Request {} timed out waiting for worker capacity",
                        request_id
                    );
                    expired += 1;
                }
                Err(OrchestratorError::Conflict(e)) => {
                    tracing::warn!("Timeout sweep conflict: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }
}

fn stage_report(change: &mut RequestChange, task_id: TaskId, report: &WorkerReport) -> Result<()> {
    let current = change
        .task(task_id)
        .ok_or(OrchestratorError::UnknownTask(task_id))?
        .status;

    if report.status.is_terminal() && current == TaskStatus::Dispatched {
        change.apply(task_id, |t, now| t.start(now))?;
    }

    match report.status {
        ReportedStatus::Running => {
            change.apply(task_id, |t, now| t.start(now))?;
        }
        ReportedStatus::Success => {
            let payload = report.result_payload.clone();
            change.apply(task_id, |t, now| t.succeed(payload, now))?;
        }
        ReportedStatus::Failure => {
            let payload = report.result_payload.clone();
            let failed = change.apply(task_id, |t, now| t.fail(payload, now))?.task_id;
            let task_type = change
                .task(failed)
                .map(|t| t.task_type.clone())
                .unwrap_or_default();
            for descendant in change.descendants(failed) {
                if change.task(descendant).map(|t| t.status) != Some(TaskStatus::Queued) {
                    continue;
                }
                let reason = FailureReason::UpstreamFailed {
                    task_id: failed,
                    task_type: task_type.clone(),
                };
                change.apply(descendant, |t, now| t.fail_unexecuted(reason, now))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{EvidenceDescriptor, EvidenceRegistry};
    use crate::recipe::{Recipe, RecipeCompiler, TaskSpec};
    use crate::store::{InMemoryStore, OrchestratorStore};
    use crate::task::{RequestRecord, TerminalReason};
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        state: Arc<RequestStateMachine>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let store: Arc<dyn OrchestratorStore> = Arc::new(InMemoryStore::new());
        let state = Arc::new(RequestStateMachine::new(store));
        let dispatcher = Arc::new(Dispatcher::new(
            state.clone(),
            Arc::new(Notify::new()),
            timeout,
        ));
        Fixture { dispatcher, state }
    }

    impl Fixture {
        async fn submit(&self, tasks: Vec<TaskSpec>) -> (RequestId, HashMap<String, TaskId>) {
            let store = self.state.store().clone();
            let evidence = EvidenceRegistry::new(store)
                .register(&EvidenceDescriptor::new("rawdisk", "artifact_disk.dd"))
                .await
                .unwrap();
            let graph = RecipeCompiler::default()
                .compile_recipe(&Recipe::new("test", tasks), &evidence.id)
                .unwrap();
            let now = Utc::now();
            let request_id = RequestId::new();
            let tasks = graph.clone().into_tasks(request_id, now);
            let request = RequestRecord {
                id: request_id,
                evidence_id: evidence.id,
                recipe_name: graph.recipe_name,
                status: RequestStatus::Queued,
                terminal_reason: None,
                requester: "tester".to_string(),
                reason: None,
                task_ids: tasks.iter().map(|t| t.id).collect(),
                created_at: now,
                updated_at: now,
                version: 0,
            };
            self.state.create(&request, &tasks).await.unwrap();
            let ids = tasks.iter().map(|t| (t.task_type.clone(), t.id)).collect();
            (request_id, ids)
        }

        async fn task_status(&self, id: TaskId) -> TaskStatus {
            self.state.store().get_task(id).await.unwrap().unwrap().status
        }
    }

    #[tokio::test]
    async fn test_dispatch_waits_for_dependencies_and_capacity() {
        let f = fixture(Duration::from_secs(3600));
        let (request_id, ids) = f
            .submit(vec![
                TaskSpec::new("PartitionEnumerationTask"),
                TaskSpec::new("FsstatTask").depends_on("PartitionEnumerationTask"),
            ])
            .await;

        // No workers yet: nothing happens.
        assert!(f.dispatcher.dispatch_ready_tasks().await.unwrap().dispatched.is_empty());

        f.dispatcher.register_worker(WorkerId::from("w1"), 4).unwrap();
        let report = f.dispatcher.dispatch_ready_tasks().await.unwrap();
        assert_eq!(
            report.dispatched,
            vec![(ids["PartitionEnumerationTask"], WorkerId::from("w1"))]
        );
        // A second pass must not double-assign.
        assert!(f.dispatcher.dispatch_ready_tasks().await.unwrap().dispatched.is_empty());

        let status = f.state.get_status(request_id).await.unwrap();
        assert_eq!(status.status, RequestStatus::Running);

        f.dispatcher
            .report_outcome(ids["PartitionEnumerationTask"], WorkerReport::success(None))
            .await
            .unwrap();
        let report = f.dispatcher.dispatch_ready_tasks().await.unwrap();
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.dispatched[0].0, ids["FsstatTask"]);
    }

    #[tokio::test]
    async fn test_terminal_report_on_dispatched_task_records_running() {
        let f = fixture(Duration::from_secs(3600));
        let (request_id, ids) = f.submit(vec![TaskSpec::new("PlasoParserTask")]).await;
        f.dispatcher.register_worker(WorkerId::from("w1"), 1).unwrap();
        f.dispatcher.dispatch_ready_tasks().await.unwrap();
        assert!(!f.dispatcher.pool().has_capacity());

        let task_id = ids["PlasoParserTask"];
        let disposition = f
            .dispatcher
            .report_outcome(
                task_id,
                WorkerReport::success(Some(serde_json::json!({"output_log": "/tmp/plaso.log"}))),
            )
            .await
            .unwrap();
        assert_eq!(disposition, ReportDisposition::Applied);
        assert!(f.dispatcher.pool().has_capacity(), "slot released");

        let history = f.state.store().task_history(task_id).await.unwrap();
        let steps: Vec<_> = history.iter().map(|t| t.to).collect();
        assert_eq!(
            steps,
            vec![TaskStatus::Dispatched, TaskStatus::Running, TaskStatus::Success]
        );
        let status = f.state.get_status(request_id).await.unwrap();
        assert_eq!(status.status, RequestStatus::Successful);
    }

    #[tokio::test]
    async fn test_reports_are_checked_against_state() {
        let f = fixture(Duration::from_secs(3600));
        let (_, ids) = f.submit(vec![TaskSpec::new("FsstatTask")]).await;
        let task_id = ids["FsstatTask"];

        let err = f
            .dispatcher
            .report_outcome(task_id, WorkerReport::running())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        let err = f
            .dispatcher
            .report_outcome(TaskId::new(), WorkerReport::running())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTask(_)));

        f.dispatcher.register_worker(WorkerId::from("w1"), 1).unwrap();
        f.dispatcher.dispatch_ready_tasks().await.unwrap();
        f.dispatcher
            .report_outcome(task_id, WorkerReport::running())
            .await
            .unwrap();
        f.dispatcher
            .report_outcome(task_id, WorkerReport::success(None))
            .await
            .unwrap();
        let err = f
            .dispatcher
            .report_outcome(task_id, WorkerReport::failure(None))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        assert_eq!(f.task_status(task_id).await, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_failure_propagates_to_descendants_only() {
        let f = fixture(Duration::from_secs(3600));
        let (request_id, ids) = f
            .submit(vec![
                TaskSpec::new("PartitionEnumerationTask"),
                TaskSpec::new("FsstatTask").depends_on("PartitionEnumerationTask"),
                TaskSpec::new("GrepTask").depends_on("FsstatTask"),
                TaskSpec::new("YaraAnalysisTask"),
            ])
            .await;
        f.dispatcher.register_worker(WorkerId::from("w1"), 1).unwrap();
        f.dispatcher.dispatch_ready_tasks().await.unwrap();

        f.dispatcher
            .report_outcome(ids["PartitionEnumerationTask"], WorkerReport::failure(None))
            .await
            .unwrap();

        for name in ["FsstatTask", "GrepTask"] {
            let task = f.state.store().get_task(ids[name]).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Failure);
            assert!(task.dispatched_at.is_none(), "{} never dispatched", name);
            assert!(matches!(
                task.failure_reason,
                Some(FailureReason::UpstreamFailed { .. })
            ));
        }
        // The independent task still runs; the request waits for it.
        assert_eq!(f.task_status(ids["YaraAnalysisTask"]).await, TaskStatus::Queued);
        let status = f.state.get_status(request_id).await.unwrap();
        assert_eq!(status.status, RequestStatus::Running);

        f.dispatcher.dispatch_ready_tasks().await.unwrap();
        f.dispatcher
            .report_outcome(ids["YaraAnalysisTask"], WorkerReport::success(None))
            .await
            .unwrap();
        let status = f.state.get_status(request_id).await.unwrap();
        assert_eq!(status.status, RequestStatus::Failed);
        assert_eq!(status.terminal_reason, Some(TerminalReason::TaskFailed));
    }

    #[tokio::test]
    async fn test_dispatch_timeout_fails_queued_tasks() {
        let f = fixture(Duration::from_secs(60));
        let (request_id, ids) = f
            .submit(vec![
                TaskSpec::new("PlasoParserTask"),
                TaskSpec::new("YaraAnalysisTask").depends_on("PlasoParserTask"),
            ])
            .await;

        assert_eq!(f.dispatcher.expire_starved(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(f.dispatcher.expire_starved(later).await.unwrap(), 1);

        let status = f.state.get_status(request_id).await.unwrap();
        assert_eq!(status.status, RequestStatus::Failed);
        assert_eq!(status.terminal_reason, Some(TerminalReason::DispatchTimeout));
        let task = f.state.store().get_task(ids["YaraAnalysisTask"]).await.unwrap().unwrap();
        assert_eq!(task.failure_reason, Some(FailureReason::DispatchTimeout));
    }

    #[tokio::test]
    async fn test_spare_capacity_prevents_timeout() {
        let f = fixture(Duration::from_secs(60));
        let (request_id, _) = f.submit(vec![TaskSpec::new("PlasoParserTask")]).await;
        f.dispatcher.register_worker(WorkerId::from("w1"), 1).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(f.dispatcher.expire_starved(later).await.unwrap(), 0);
        let status = f.state.get_status(request_id).await.unwrap();
        assert_eq!(status.status, RequestStatus::Queued);
    }

    #[tokio::test]
    async fn test_worker_registration_and_assignments() {
        let f = fixture(Duration::from_secs(3600));
        let (_, ids) = f.submit(vec![TaskSpec::new("StringsAsciiTask")]).await;
        let worker = WorkerId::from("w1");

        assert!(f.dispatcher.register_worker(worker.clone(), 0).is_err());
        assert!(matches!(
            f.dispatcher.assignments(&worker).await.unwrap_err(),
            OrchestratorError::NotFound { .. }
        ));

        f.dispatcher.register_worker(worker.clone(), 2).unwrap();
        f.dispatcher.dispatch_ready_tasks().await.unwrap();
        let assignments = f.dispatcher.assignments(&worker).await.unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].task_id, ids["StringsAsciiTask"]);
        assert_eq!(assignments[0].evidence.source_locator, "artifact_disk.dd");

        f.dispatcher.deregister_worker(&worker).unwrap();
        assert!(f.dispatcher.deregister_worker(&worker).is_err());
    }

    #[tokio::test]
    async fn test_reserve_without_capacity() {
        let f = fixture(Duration::from_secs(3600));
        assert!(matches!(
            f.dispatcher.reserve(TaskId::new()),
            Err(OrchestratorError::WorkerUnavailable)
        ));

        f.dispatcher.register_worker(WorkerId::from("w1"), 1).unwrap();
        let held = TaskId::new();
        assert_eq!(f.dispatcher.reserve(held).unwrap(), WorkerId::from("w1"));
        assert!(matches!(
            f.dispatcher.reserve(TaskId::new()),
            Err(OrchestratorError::WorkerUnavailable)
        ));
        f.dispatcher.pool().release(held);
        assert!(f.dispatcher.reserve(TaskId::new()).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_passes_dispatch_each_task_once() {
        let f = fixture(Duration::from_secs(3600));
        let mut task_ids = Vec::new();
        for _ in 0..6 {
            let (_, ids) = f
                .submit(vec![
                    TaskSpec::new("PlasoParserTask"),
                    TaskSpec::new("YaraAnalysisTask"),
                    TaskSpec::new("StringsAsciiTask"),
                ])
                .await;
            task_ids.extend(ids.into_values());
        }
        f.dispatcher.register_worker(WorkerId::from("w1"), 64).unwrap();

        let passes: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&f.dispatcher);
                tokio::spawn(async move { dispatcher.dispatch_ready_tasks().await })
            })
            .collect();
        let mut dispatched = Vec::new();
        for pass in futures::future::join_all(passes).await {
            dispatched.extend(pass.unwrap().unwrap().dispatched);
        }
        // Requests skipped as busy are picked up by a quiet pass.
        dispatched.extend(f.dispatcher.dispatch_ready_tasks().await.unwrap().dispatched);

        let unique: HashSet<TaskId> = dispatched.iter().map(|(id, _)| *id).collect();
        assert_eq!(dispatched.len(), task_ids.len());
        assert_eq!(unique.len(), task_ids.len());
        for id in &task_ids {
            let history = f.state.store().task_history(*id).await.unwrap();
            let dispatches = history
                .iter()
                .filter(|t| t.to == TaskStatus::Dispatched)
                .count();
            assert_eq!(dispatches, 1, "task {} dispatched once", id);
            assert_eq!(f.task_status(*id).await, TaskStatus::Dispatched);
        }
        let in_flight: usize = f
            .dispatcher
            .pool()
            .snapshot()
            .iter()
            .map(|w| w.in_flight)
            .sum();
        assert_eq!(in_flight, task_ids.len());
    }
}
