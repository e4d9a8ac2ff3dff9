//! Read-only views for polling clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dispatch::{Dispatcher, WorkerId, WorkerInfo, WorkerPool};
use crate::error::{OrchestratorError, Result};
use crate::evidence::EvidenceId;
use crate::state::RequestStateMachine;
use crate::store::{OrchestratorStore, RequestFilter};
use crate::task::{
    FailureReason, RequestId, RequestRecord, RequestStatus, TaskId, TaskRecord, TaskStatus,
    TaskTransition, TerminalReason,
};

/// One task as seen by a polling client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub depends_on: Vec<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<WorkerId>,
    pub result_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&TaskRecord> for TaskSnapshot {
    fn from(task: &TaskRecord) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            status: task.status,
            depends_on: task.depends_on.clone(),
            assigned_worker: task.assigned_worker.clone(),
            result_summary: result_summary(task),
            result_payload: task.result_payload.clone(),
            failure_reason: task.failure_reason.clone(),
            dispatched_at: task.dispatched_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
        }
    }
}

/// Short human-readable outcome of a finished task.
fn result_summary(task: &TaskRecord) -> Option<String> {
    if !task.status.is_terminal() {
        return None;
    }
    let from_payload = task.result_payload.as_ref().and_then(|payload| {
        ["summary", "status"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    });
    from_payload
        .or_else(|| task.failure_reason.as_ref().map(FailureReason::describe))
        .or_else(|| match task.status {
            TaskStatus::Cancelled => Some("cancelled".to_string()),
            _ => None,
        })
}

/// Point-in-time view of a request and all of its tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSnapshot {
    pub request_id: RequestId,
    pub evidence_id: EvidenceId,
    pub recipe_name: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,
    pub requester: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<TaskSnapshot>,
}

impl RequestSnapshot {
    pub fn new(request: &RequestRecord, tasks: &[TaskRecord]) -> Self {
        Self {
            request_id: request.id,
            evidence_id: request.evidence_id.clone(),
            recipe_name: request.recipe_name.clone(),
            status: request.status,
            terminal_reason: request.terminal_reason,
            requester: request.requester.clone(),
            reason: request.reason.clone(),
            created_at: request.created_at,
            updated_at: request.updated_at,
            tasks: tasks.iter().map(TaskSnapshot::from).collect(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Polling clients treat only `successful` as success.
    pub fn succeeded(&self) -> bool {
        self.status == RequestStatus::Successful
    }
}

/// One row of the request listing.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub evidence_id: EvidenceId,
    pub recipe_name: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<TerminalReason>,
    pub requester: String,
    pub task_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Seconds from submission to the terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl From<RequestRecord> for RequestSummary {
    fn from(request: RequestRecord) -> Self {
        let duration_secs = request_duration(&request);
        Self {
            request_id: request.id,
            task_count: request.task_ids.len(),
            evidence_id: request.evidence_id,
            recipe_name: request.recipe_name,
            status: request.status,
            terminal_reason: request.terminal_reason,
            duration_secs,
            requester: request.requester,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

fn request_duration(request: &RequestRecord) -> Option<f64> {
    request
        .status
        .is_terminal()
        .then(|| secs_between(request.created_at, request.updated_at))
}

fn secs_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// A task with its full transition log.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub request_id: RequestId,
    pub evidence_id: EvidenceId,
    pub config: serde_json::Map<String, Value>,
    #[serde(flatten)]
    pub task: TaskSnapshot,
    pub history: Vec<TaskTransition>,
}

/// Spread of a set of durations, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: usize,
    pub mean_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

#[derive(Debug, Clone, Default)]
struct DurationAcc {
    count: usize,
    total: f64,
    min: f64,
    max: f64,
}

impl DurationAcc {
    fn add(&mut self, secs: f64) {
        if self.count == 0 {
            self.min = secs;
            self.max = secs;
        } else {
            self.min = self.min.min(secs);
            self.max = self.max.max(secs);
        }
        self.count += 1;
        self.total += secs;
    }

    fn finish(&self) -> Option<DurationStats> {
        (self.count > 0).then(|| DurationStats {
            count: self.count,
            mean_secs: self.total / self.count as f64,
            min_secs: self.min,
            max_secs: self.max,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskTypeStats {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    /// Start-to-finish time over tasks that ran.
    pub run_time: Option<DurationStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub run_time: Option<DurationStats>,
}

/// Per-requester totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequesterStats {
    pub requests: usize,
    pub tasks: usize,
    pub by_status: BTreeMap<RequestStatus, usize>,
    /// Submission-to-terminal time over finished requests.
    pub request_duration: Option<DurationStats>,
}

/// Aggregate counts over all requests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub requests: BTreeMap<RequestStatus, usize>,
    pub request_duration: Option<DurationStats>,
    pub tasks: BTreeMap<TaskStatus, usize>,
    pub task_types: BTreeMap<String, TaskTypeStats>,
    pub requesters: BTreeMap<String, RequesterStats>,
    pub workers: BTreeMap<WorkerId, WorkerStats>,
    pub registered_workers: Vec<WorkerInfo>,
}

/// Duration accumulators keyed the same way as the public maps.
#[derive(Default)]
struct Timings {
    requests: DurationAcc,
    task_types: BTreeMap<String, DurationAcc>,
    requesters: BTreeMap<String, DurationAcc>,
    workers: BTreeMap<WorkerId, DurationAcc>,
}

/// Side-effect free queries over the store.
#[derive(Clone)]
pub struct StatusApi {
    state: Arc<RequestStateMachine>,
    store: Arc<dyn OrchestratorStore>,
    dispatcher: Option<Arc<Dispatcher>>,
}

const STATS_PAGE: usize = 500;

impl StatusApi {
    pub fn new(state: Arc<RequestStateMachine>) -> Self {
        Self {
            store: state.store().clone(),
            state,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    fn workers(&self) -> Option<&WorkerPool> {
        self.dispatcher.as_deref().map(Dispatcher::pool)
    }

    /// Snapshot of one request. Repeated polls never change anything.
    pub async fn poll(&self, id: RequestId) -> Result<RequestSnapshot> {
        self.state.get_status(id).await
    }

    /// Requests matching `filter`, newest first.
    pub async fn list(
        &self,
        filter: &RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestSummary>> {
        let requests = self
            .store
            .list_requests(filter, limit, offset)
            .await
            .map_err(OrchestratorError::Store)?;
        Ok(requests.into_iter().map(RequestSummary::from).collect())
    }

    pub async fn task(&self, id: TaskId) -> Result<TaskDetail> {
        let task = self
            .store
            .get_task(id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or(OrchestratorError::UnknownTask(id))?;
        let history = self
            .store
            .task_history(id)
            .await
            .map_err(OrchestratorError::Store)?;
        Ok(TaskDetail {
            request_id: task.request_id,
            evidence_id: task.evidence_id.clone(),
            config: task.config.clone(),
            task: TaskSnapshot::from(&task),
            history,
        })
    }

    pub async fn stats(&self) -> Result<Stats> {
        let mut stats = Stats::default();
        let mut timings = Timings::default();
        let all = RequestFilter::default();

        let mut offset = 0;
        loop {
            let page = self
                .store
                .list_requests(&all, STATS_PAGE, offset)
                .await
                .map_err(OrchestratorError::Store)?;
            let fetched = page.len();
            for request in page {
                let Some((request, tasks)) = self
                    .store
                    .load_request(request.id)
                    .await
                    .map_err(OrchestratorError::Store)?
                else {
                    continue;
                };
                record_request(&mut stats, &mut timings, &request);
                for task in &tasks {
                    record_task(&mut stats, &mut timings, task);
                }
            }
            if fetched < STATS_PAGE {
                break;
            }
            offset += fetched;
        }

        stats.request_duration = timings.requests.finish();
        for (task_type, acc) in &timings.task_types {
            if let Some(entry) = stats.task_types.get_mut(task_type) {
                entry.run_time = acc.finish();
            }
        }
        for (requester, acc) in &timings.requesters {
            if let Some(entry) = stats.requesters.get_mut(requester) {
                entry.request_duration = acc.finish();
            }
        }
        for (worker, acc) in &timings.workers {
            if let Some(entry) = stats.workers.get_mut(worker) {
                entry.run_time = acc.finish();
            }
        }
        if let Some(pool) = self.workers() {
            stats.registered_workers = pool.snapshot();
            for info in &stats.registered_workers {
                stats.workers.entry(info.id.clone()).or_default();
            }
        }
        Ok(stats)
    }
}

fn record_request(stats: &mut Stats, timings: &mut Timings, request: &RequestRecord) {
    *stats.requests.entry(request.status).or_default() += 1;

    let requester = stats.requesters.entry(request.requester.clone()).or_default();
    requester.requests += 1;
    requester.tasks += request.task_ids.len();
    *requester.by_status.entry(request.status).or_default() += 1;

    if let Some(secs) = request_duration(request) {
        timings.requests.add(secs);
        timings
            .requesters
            .entry(request.requester.clone())
            .or_default()
            .add(secs);
    }
}

fn record_task(stats: &mut Stats, timings: &mut Timings, task: &TaskRecord) {
    *stats.tasks.entry(task.status).or_default() += 1;

    let by_type = stats.task_types.entry(task.task_type.clone()).or_default();
    by_type.total += 1;
    *by_type.by_status.entry(task.status).or_default() += 1;

    let run_secs = match (task.started_at, task.finished_at) {
        (Some(started), Some(finished)) => Some(secs_between(started, finished)),
        _ => None,
    };
    if let Some(secs) = run_secs {
        timings
            .task_types
            .entry(task.task_type.clone())
            .or_default()
            .add(secs);
    }

    if let Some(worker) = &task.assigned_worker {
        let entry = stats.workers.entry(worker.clone()).or_default();
        match task.status {
            TaskStatus::Dispatched | TaskStatus::Running => entry.in_flight += 1,
            TaskStatus::Success => entry.succeeded += 1,
            TaskStatus::Failure => entry.failed += 1,
            _ => {}
        }
        if let Some(secs) = run_secs {
            timings.workers.entry(worker.clone()).or_default().add(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task::tests::queued_task;
    use serde_json::json;

    #[test]
    fn test_result_summary_sources() {
        let now = Utc::now();
        let mut task = queued_task("PlasoParserTask");
        assert_eq!(result_summary(&task), None);

        task.dispatch(WorkerId::from("w"), now).unwrap();
        task.start(now).unwrap();
        task.succeed(Some(json!({"summary": "42 events", "output_log": "/tmp/a.log"})), now)
            .unwrap();
        assert_eq!(result_summary(&task).as_deref(), Some("42 events"));

        let mut upstream = queued_task("FsstatTask");
        upstream
            .fail_unexecuted(FailureReason::DispatchTimeout, now)
            .unwrap();
        assert_eq!(
            result_summary(&upstream),
            Some(FailureReason::DispatchTimeout.describe())
        );
    }

    #[test]
    fn test_duration_acc_tracks_spread() {
        let mut acc = DurationAcc::default();
        assert_eq!(acc.finish(), None);
        for secs in [4.0, 1.0, 7.0] {
            acc.add(secs);
        }
        assert_eq!(
            acc.finish(),
            Some(DurationStats {
                count: 3,
                mean_secs: 4.0,
                min_secs: 1.0,
                max_secs: 7.0,
            })
        );
    }

    #[test]
    fn test_stats_group_by_requester_with_durations() {
        let mut stats = Stats::default();
        let mut timings = Timings::default();
        let created = Utc::now();

        let mut task = queued_task("PlasoParserTask");
        task.dispatch(WorkerId::from("w1"), created).unwrap();
        task.start(created).unwrap();
        task.succeed(None, created + chrono::Duration::seconds(3))
            .unwrap();

        let mut done = RequestRecord {
            id: task.request_id,
            evidence_id: task.evidence_id.clone(),
            recipe_name: "triage".to_string(),
            status: RequestStatus::Successful,
            terminal_reason: None,
            requester: "alice".to_string(),
            reason: None,
            task_ids: vec![task.id],
            created_at: created,
            updated_at: created + chrono::Duration::seconds(10),
            version: 3,
        };
        record_request(&mut stats, &mut timings, &done);
        record_task(&mut stats, &mut timings, &task);

        done.status = RequestStatus::Running;
        done.requester = "bob".to_string();
        record_request(&mut stats, &mut timings, &done);

        let alice = &stats.requesters["alice"];
        assert_eq!(alice.requests, 1);
        assert_eq!(alice.tasks, 1);
        assert_eq!(alice.by_status[&RequestStatus::Successful], 1);
        assert_eq!(timings.requesters["alice"].finish().unwrap().max_secs, 10.0);
        assert!(!timings.requesters.contains_key("bob"));
        assert_eq!(stats.requesters["bob"].by_status[&RequestStatus::Running], 1);

        let run = timings.task_types["PlasoParserTask"].finish().unwrap();
        assert_eq!(run.count, 1);
        assert_eq!(run.min_secs, 3.0);
        assert_eq!(stats.workers[&WorkerId::from("w1")].succeeded, 1);

        assert_eq!(RequestSummary::from(done.clone()).duration_secs, None);
        done.status = RequestStatus::Failed;
        assert_eq!(RequestSummary::from(done).duration_secs, Some(10.0));
    }

    #[test]
    fn test_snapshot_serialises_type_field() {
        let task = queued_task("PlasoParserTask");
        let value = serde_json::to_value(TaskSnapshot::from(&task)).unwrap();
        assert_eq!(value["type"], "PlasoParserTask");
        assert_eq!(value["status"], "queued");
        assert!(value.get("result_payload").is_none());
    }
}
