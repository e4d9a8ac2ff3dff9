//! Request/task storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database with a durable transition log

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::evidence::{Evidence, EvidenceId};
use crate::task::{RequestId, RequestRecord, RequestStatus, TaskId, TaskRecord, TaskStatus, TaskTransition};

/// A task row to write, guarded by the status it is expected to have now.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub record: TaskRecord,
    pub expected: TaskStatus,
}

/// Everything one state-machine step writes, applied atomically.
///
/// The request row is guarded by `expected_version`; each task row by its
/// expected status. Any mismatch rejects the whole commit.
#[derive(Debug, Clone)]
pub struct RequestCommit {
    pub request: RequestRecord,
    pub expected_version: u64,
    pub tasks: Vec<TaskUpdate>,
    pub transitions: Vec<TaskTransition>,
}

/// Optional constraints on the request listing. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub requester: Option<String>,
    pub status: Option<RequestStatus>,
    /// Only requests created at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl RequestFilter {
    pub fn matches(&self, request: &RequestRecord) -> bool {
        self.requester
            .as_deref()
            .map_or(true, |r| request.requester == r)
            && self.status.map_or(true, |s| request.status == s)
            && self.since.map_or(true, |t| request.created_at >= t)
    }
}

/// Result of a compare-and-swap commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Conflict,
}

/// Store trait - implemented by all storage backends.
#[async_trait]
pub trait OrchestratorStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Insert evidence unless a record with the same id exists; returns the stored record.
    async fn insert_evidence(&self, evidence: &Evidence) -> Result<Evidence, String>;

    async fn get_evidence(&self, id: &EvidenceId) -> Result<Option<Evidence>, String>;

    /// Create a request together with all of its tasks.
    async fn create_request(
        &self,
        request: &RequestRecord,
        tasks: &[TaskRecord],
    ) -> Result<(), String>;

    /// Read a request and its tasks (in topological order) as one consistent view.
    async fn load_request(
        &self,
        id: RequestId,
    ) -> Result<Option<(RequestRecord, Vec<TaskRecord>)>, String>;

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, String>;

    /// List requests matching `filter`, newest first.
    async fn list_requests(
        &self,
        filter: &RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestRecord>, String>;

    /// Ids of requests in any of `statuses`, oldest first.
    async fn list_request_ids_by_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<RequestId>, String>;

    /// Tasks in any of `statuses`.
    async fn list_tasks_by_status(&self, statuses: &[TaskStatus])
        -> Result<Vec<TaskRecord>, String>;

    /// Apply a commit if every guard still holds.
    async fn commit(&self, commit: &RequestCommit) -> Result<CommitOutcome, String>;

    /// Recorded transitions of a task, oldest first.
    async fn task_history(&self, id: TaskId) -> Result<Vec<TaskTransition>, String>;
}

/// Store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    Memory,
    #[default]
    Sqlite,
}

impl std::str::FromStr for StoreType {
    type Err = String;

    /// Parse from environment variable value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(format!("unknown store type '{}' (expected sqlite or memory)", other)),
        }
    }
}

/// Create a store based on type and data directory.
pub async fn create_store(
    store_type: StoreType,
    data_dir: PathBuf,
) -> Result<std::sync::Arc<dyn OrchestratorStore>, String> {
    match store_type {
        StoreType::Memory => Ok(std::sync::Arc::new(InMemoryStore::new())),
        StoreType::Sqlite => {
            let store = SqliteStore::new(data_dir.join("orchestrator.db")).await?;
            Ok(std::sync::Arc::new(store))
        }
    }
}
