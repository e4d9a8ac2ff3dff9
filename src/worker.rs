//! Worker-side execution contract and an in-process worker loop.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatch::{ReportDisposition, TaskAssignment, WorkerId, WorkerReport};
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::task::TaskStatus;

/// Result of executing one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub success: bool,
    pub payload: Option<Value>,
}

impl TaskOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Some(json!({ "status": message.into() })),
        }
    }

    fn into_report(self) -> WorkerReport {
        if self.success {
            WorkerReport::success(self.payload)
        } else {
            WorkerReport::failure(self.payload)
        }
    }
}

/// Runs the analysis behind a task type. Implementations interpret the
/// task config; the orchestrator never does.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, assignment: &TaskAssignment) -> TaskOutcome;
}

/// Executor that analyses nothing and writes a one-line log per task.
pub struct DryRunExecutor {
    output_dir: PathBuf,
}

impl DryRunExecutor {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

#[async_trait]
impl TaskExecutor for DryRunExecutor {
    async fn execute(&self, assignment: &TaskAssignment) -> TaskOutcome {
        let log_path = self.output_dir.join(format!("{}.log", assignment.task_id));
        let line = format!(
            "{} dry run on {} evidence {}\n",
            assignment.task_type, assignment.evidence.kind, assignment.evidence.source_locator
        );
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            return TaskOutcome::failure(format!("cannot create output dir: {}", e));
        }
        if let Err(e) = tokio::fs::write(&log_path, line).await {
            return TaskOutcome::failure(format!("cannot write output log: {}", e));
        }
        TaskOutcome::success(json!({
            "summary": format!("{} completed (dry run)", assignment.task_type),
            "output_log": log_path.to_string_lossy(),
        }))
    }
}

/// A worker living in the orchestrator process. It pulls its assignments
/// the same way a remote worker would over HTTP.
pub struct LocalWorker {
    id: WorkerId,
    capacity: usize,
    orchestrator: Arc<Orchestrator>,
    executor: Arc<dyn TaskExecutor>,
    poll_interval: Duration,
}

impl LocalWorker {
    pub fn new(
        id: WorkerId,
        capacity: usize,
        orchestrator: Arc<Orchestrator>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            id,
            capacity,
            orchestrator,
            executor,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn register(&self) -> Result<()> {
        self.orchestrator
            .dispatcher()
            .register_worker(self.id.clone(), self.capacity)?;
        Ok(())
    }

    /// Execute every assignment this worker holds. Returns how many ran.
    ///
    /// Passes never overlap, so a task already `running` at the start of a
    /// pass was left behind by an earlier process and is executed again.
    pub async fn run_once(&self) -> Result<usize> {
        let pending: Vec<TaskAssignment> = self
            .orchestrator
            .dispatcher()
            .assignments(&self.id)
            .await?
            .into_iter()
            .filter(|a| a.status.is_in_flight())
            .collect();
        let count = pending.len();
        futures::future::join_all(pending.iter().map(|a| self.run_one(a))).await;
        Ok(count)
    }

    async fn run_one(&self, assignment: &TaskAssignment) {
        let task_id = assignment.task_id;
        if assignment.status == TaskStatus::Running {
            tracing::info!("Worker {} resuming task {}", self.id, task_id);
        } else {
            match self
                .orchestrator
                .report_outcome(task_id, WorkerReport::running())
                .await
            {
                Ok(ReportDisposition::Applied) => {}
                Ok(ReportDisposition::Discarded) => return,
                Err(e) => {
                    tracing::warn!("Worker {} could not start task {}: {}", self.id, task_id, e);
                    return;
                }
            }
        }

        tracing::debug!("Worker {} running {} ({})", self.id, task_id, assignment.task_type);
        let outcome = self.executor.execute(assignment).await;
        if let Err(e) = self
            .orchestrator
            .report_outcome(task_id, outcome.into_report())
            .await
        {
            tracing::warn!("Worker {} could not report task {}: {}", self.id, task_id, e);
        }
    }

    /// Register and poll for work until `shutdown` flips to `true`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.register() {
                tracing::error!("Worker {} failed to register: {}", self.id, e);
                return;
            }
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                if let Err(e) = self.run_once().await {
                    tracing::warn!("Worker {} poll failed: {}", self.id, e);
                }
            }

            if let Err(e) = self.orchestrator.dispatcher().deregister_worker(&self.id) {
                tracing::debug!("Worker {} deregistration: {}", self.id, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceDescriptor;
    use crate::orchestrator::{OrchestratorOptions, Submission};
    use crate::store::{InMemoryStore, SqliteStore};
    use crate::task::RequestStatus;

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        async fn execute(&self, assignment: &TaskAssignment) -> TaskOutcome {
            TaskOutcome::failure(format!("{} crashed", assignment.task_type))
        }
    }

    async fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(
            Orchestrator::new(Arc::new(InMemoryStore::new()), OrchestratorOptions::default())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_dry_run_worker_completes_request() {
        let orchestrator = orchestrator().await;
        let output = tempfile::tempdir().unwrap();
        let worker = LocalWorker::new(
            WorkerId::from("local-0"),
            2,
            orchestrator.clone(),
            Arc::new(DryRunExecutor::new(output.path().to_path_buf())),
        );
        worker.register().unwrap();

        let id = orchestrator
            .submit(Submission::new(
                EvidenceDescriptor::new("rawdisk", "artifact_disk.dd"),
                "tasks:\n  - type: PartitionEnumerationTask\n  - type: PlasoParserTask\n    depends_on: [PartitionEnumerationTask]\n",
            ))
            .await
            .unwrap();

        for _ in 0..2 {
            orchestrator.dispatcher().dispatch_ready_tasks().await.unwrap();
            assert_eq!(worker.run_once().await.unwrap(), 1);
        }

        let snapshot = orchestrator.get_status(id).await.unwrap();
        assert_eq!(snapshot.status, RequestStatus::Successful);
        let log = snapshot.tasks[1].result_payload.as_ref().unwrap()["output_log"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(std::path::Path::new(&log).exists());
        assert_eq!(
            snapshot.tasks[1].result_summary.as_deref(),
            Some("PlasoParserTask completed (dry run)")
        );
    }

    #[tokio::test]
    async fn test_failed_execution_is_reported() {
        let orchestrator = orchestrator().await;
        let worker = LocalWorker::new(
            WorkerId::from("local-0"),
            1,
            orchestrator.clone(),
            Arc::new(FailingExecutor),
        );
        worker.register().unwrap();
        let id = orchestrator
            .submit(Submission::new(
                EvidenceDescriptor::new("textfile", "/evidence/notes.txt"),
                "tasks:\n  - type: GrepTask\n",
            ))
            .await
            .unwrap();
        orchestrator.dispatcher().dispatch_ready_tasks().await.unwrap();
        worker.run_once().await.unwrap();

        let snapshot = orchestrator.get_status(id).await.unwrap();
        assert_eq!(snapshot.status, RequestStatus::Failed);
        assert_eq!(
            snapshot.tasks[0].result_summary.as_deref(),
            Some("GrepTask crashed")
        );
    }

    #[tokio::test]
    async fn test_running_task_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.db");
        let worker_id = WorkerId::from("local-0");

        let id = {
            let store = Arc::new(SqliteStore::new(path.clone()).await.unwrap());
            let orchestrator = Orchestrator::new(store, OrchestratorOptions::default())
                .await
                .unwrap();
            let id = orchestrator
                .submit(Submission::new(
                    EvidenceDescriptor::new("rawdisk", "artifact_disk.dd"),
                    "tasks:\n  - type: PlasoParserTask\n",
                ))
                .await
                .unwrap();
            orchestrator
                .dispatcher()
                .register_worker(worker_id.clone(), 1)
                .unwrap();
            let dispatched = orchestrator
                .dispatcher()
                .dispatch_ready_tasks()
                .await
                .unwrap()
                .dispatched;
            orchestrator
                .report_outcome(dispatched[0].0, WorkerReport::running())
                .await
                .unwrap();
            id
        };

        let store = Arc::new(SqliteStore::new(path).await.unwrap());
        let orchestrator = Arc::new(
            Orchestrator::new(store, OrchestratorOptions::default())
                .await
                .unwrap(),
        );
        let worker = LocalWorker::new(
            worker_id,
            1,
            orchestrator.clone(),
            Arc::new(DryRunExecutor::new(dir.path().join("outputs"))),
        );
        worker.register().unwrap();
        assert!(!orchestrator.dispatcher().pool().has_capacity());

        orchestrator.dispatcher().dispatch_ready_tasks().await.unwrap();
        assert_eq!(worker.run_once().await.unwrap(), 1);

        let snapshot = orchestrator.get_status(id).await.unwrap();
        assert_eq!(snapshot.status, RequestStatus::Successful);
        assert!(orchestrator.dispatcher().pool().has_capacity());
        assert_eq!(worker.run_once().await.unwrap(), 0);
    }
}
