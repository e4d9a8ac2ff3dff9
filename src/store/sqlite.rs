//! SQLite-based store with a durable task transition log.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{CommitOutcome, OrchestratorStore, RequestCommit, RequestFilter};
use crate::dispatch::WorkerId;
use crate::evidence::{Evidence, EvidenceId};
use crate::task::{
    RequestId, RequestRecord, RequestStatus, TaskId, TaskRecord, TaskStatus, TaskTransition,
};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS evidence (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    source_locator TEXT NOT NULL,
    checksum TEXT,
    name TEXT,
    attributes TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY NOT NULL,
    evidence_id TEXT NOT NULL,
    recipe_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    terminal_reason TEXT,
    requester TEXT NOT NULL,
    reason TEXT,
    task_ids TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (evidence_id) REFERENCES evidence(id)
);

CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status, created_at);
CREATE INDEX IF NOT EXISTS idx_requests_created_at ON requests(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_requests_requester ON requests(requester, created_at);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    request_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    task_type TEXT NOT NULL,
    evidence_id TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    depends_on TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'queued',
    assigned_worker TEXT,
    result_payload TEXT,
    failure_reason TEXT,
    created_at TEXT NOT NULL,
    dispatched_at TEXT,
    started_at TEXT,
    finished_at TEXT,
    FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tasks_request ON tasks(request_id, position);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

CREATE TABLE IF NOT EXISTS task_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    request_id TEXT NOT NULL,
    from_status TEXT NOT NULL,
    to_status TEXT NOT NULL,
    at TEXT NOT NULL,
    reason TEXT,
    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_transitions_task ON task_transitions(task_id, id);
"#;

const REQUEST_COLUMNS: &str = "id, evidence_id, recipe_name, status, terminal_reason, requester,
     reason, task_ids, created_at, updated_at, version";

const TASK_COLUMNS: &str = "id, request_id, position, task_type, evidence_id, config, depends_on,
     status, assigned_worker, result_payload, failure_reason, created_at, dispatched_at,
     started_at, finished_at";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create store dir: {}", e))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;

            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;

            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, String> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

/// Fixed-width UTC timestamps, so text order is time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_ts(at: &Option<DateTime<Utc>>) -> Option<String> {
    at.as_ref().map(ts)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp '{}': {}", s, e))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    s.as_deref().map(parse_ts).transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| e.to_string())
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_str(s).map_err(|e| format!("Corrupt JSON column: {}", e))
}

fn parse_uuid(s: &str) -> Result<uuid::Uuid, String> {
    uuid::Uuid::parse_str(s).map_err(|e| format!("Invalid id '{}': {}", s, e))
}

/// Raw evidence columns, converted after the statement finishes.
struct EvidenceRow {
    id: String,
    kind: String,
    source_locator: String,
    checksum: Option<String>,
    name: Option<String>,
    attributes: String,
    created_at: String,
}

impl EvidenceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            source_locator: row.get(2)?,
            checksum: row.get(3)?,
            name: row.get(4)?,
            attributes: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_evidence(self) -> Result<Evidence, String> {
        Ok(Evidence {
            id: EvidenceId::from(self.id),
            kind: self.kind.parse()?,
            source_locator: self.source_locator,
            checksum: self.checksum,
            name: self.name,
            attributes: from_json(&self.attributes)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct RequestRow {
    id: String,
    evidence_id: String,
    recipe_name: String,
    status: String,
    terminal_reason: Option<String>,
    requester: String,
    reason: Option<String>,
    task_ids: String,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl RequestRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            evidence_id: row.get(1)?,
            recipe_name: row.get(2)?,
            status: row.get(3)?,
            terminal_reason: row.get(4)?,
            requester: row.get(5)?,
            reason: row.get(6)?,
            task_ids: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            version: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<RequestRecord, String> {
        Ok(RequestRecord {
            id: RequestId::from(parse_uuid(&self.id)?),
            evidence_id: EvidenceId::from(self.evidence_id),
            recipe_name: self.recipe_name,
            status: self.status.parse()?,
            terminal_reason: self.terminal_reason.map(|r| r.parse()).transpose()?,
            requester: self.requester,
            reason: self.reason,
            task_ids: from_json(&self.task_ids)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            version: self.version as u64,
        })
    }
}

struct TaskRow {
    id: String,
    request_id: String,
    position: i64,
    task_type: String,
    evidence_id: String,
    config: String,
    depends_on: String,
    status: String,
    assigned_worker: Option<String>,
    result_payload: Option<String>,
    failure_reason: Option<String>,
    created_at: String,
    dispatched_at: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            request_id: row.get(1)?,
            position: row.get(2)?,
            task_type: row.get(3)?,
            evidence_id: row.get(4)?,
            config: row.get(5)?,
            depends_on: row.get(6)?,
            status: row.get(7)?,
            assigned_worker: row.get(8)?,
            result_payload: row.get(9)?,
            failure_reason: row.get(10)?,
            created_at: row.get(11)?,
            dispatched_at: row.get(12)?,
            started_at: row.get(13)?,
            finished_at: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord, String> {
        Ok(TaskRecord {
            id: TaskId::from(parse_uuid(&self.id)?),
            request_id: RequestId::from(parse_uuid(&self.request_id)?),
            task_type: self.task_type,
            evidence_id: EvidenceId::from(self.evidence_id),
            config: from_json(&self.config)?,
            depends_on: from_json(&self.depends_on)?,
            position: self.position as usize,
            status: self.status.parse()?,
            assigned_worker: self.assigned_worker.map(WorkerId::from),
            result_payload: self.result_payload.as_deref().map(from_json).transpose()?,
            failure_reason: self.failure_reason.as_deref().map(from_json).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            dispatched_at: parse_opt_ts(self.dispatched_at)?,
            started_at: parse_opt_ts(self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
        })
    }
}

fn query_tasks(
    conn: &Connection,
    where_clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TaskRecord>, String> {
    let sql = format!("SELECT {} FROM tasks {}", TASK_COLUMNS, where_clause);
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params, TaskRow::read)
        .map_err(|e| e.to_string())?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    rows.into_iter().map(TaskRow::into_record).collect()
}

fn status_placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl OrchestratorStore for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn insert_evidence(&self, evidence: &Evidence) -> Result<Evidence, String> {
        let evidence = evidence.clone();
        let attributes = to_json(&evidence.attributes)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO evidence
                     (id, kind, source_locator, checksum, name, attributes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    evidence.id.as_str(),
                    evidence.kind.as_str(),
                    evidence.source_locator,
                    evidence.checksum,
                    evidence.name,
                    attributes,
                    ts(&evidence.created_at),
                ],
            )
            .map_err(|e| e.to_string())?;

            let row = conn
                .query_row(
                    "SELECT id, kind, source_locator, checksum, name, attributes, created_at
                     FROM evidence WHERE id = ?1",
                    params![evidence.id.as_str()],
                    EvidenceRow::read,
                )
                .map_err(|e| e.to_string())?;
            row.into_evidence()
        })
        .await
    }

    async fn get_evidence(&self, id: &EvidenceId) -> Result<Option<Evidence>, String> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, kind, source_locator, checksum, name, attributes, created_at
                     FROM evidence WHERE id = ?1",
                    params![id],
                    EvidenceRow::read,
                )
                .optional()
                .map_err(|e| e.to_string())?;
            row.map(EvidenceRow::into_evidence).transpose()
        })
        .await
    }

    async fn create_request(
        &self,
        request: &RequestRecord,
        tasks: &[TaskRecord],
    ) -> Result<(), String> {
        let request = request.clone();
        let tasks = tasks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| e.to_string())?;
            tx.execute(
                "INSERT INTO requests
                     (id, evidence_id, recipe_name, status, terminal_reason, requester, reason,
                      task_ids, created_at, updated_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    request.id.to_string(),
                    request.evidence_id.as_str(),
                    request.recipe_name,
                    request.status.as_str(),
                    request.terminal_reason.map(|r| r.as_str()),
                    request.requester,
                    request.reason,
                    to_json(&request.task_ids)?,
                    ts(&request.created_at),
                    ts(&request.updated_at),
                    request.version as i64,
                ],
            )
            .map_err(|e| format!("Failed to insert request: {}", e))?;

            for task in &tasks {
                tx.execute(
                    "INSERT INTO tasks
                         (id, request_id, position, task_type, evidence_id, config, depends_on,
                          status, assigned_worker, result_payload, failure_reason, created_at,
                          dispatched_at, started_at, finished_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    params![
                        task.id.to_string(),
                        task.request_id.to_string(),
                        task.position as i64,
                        task.task_type,
                        task.evidence_id.as_str(),
                        to_json(&task.config)?,
                        to_json(&task.depends_on)?,
                        task.status.as_str(),
                        task.assigned_worker.as_ref().map(|w| w.as_str().to_string()),
                        task.result_payload.as_ref().map(to_json).transpose()?,
                        task.failure_reason.as_ref().map(to_json).transpose()?,
                        ts(&task.created_at),
                        opt_ts(&task.dispatched_at),
                        opt_ts(&task.started_at),
                        opt_ts(&task.finished_at),
                    ],
                )
                .map_err(|e| format!("Failed to insert task: {}", e))?;
            }

            tx.commit().map_err(|e| e.to_string())
        })
        .await
    }

    async fn load_request(
        &self,
        id: RequestId,
    ) -> Result<Option<(RequestRecord, Vec<TaskRecord>)>, String> {
        let id_str = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM requests WHERE id = ?1", REQUEST_COLUMNS),
                    params![id_str],
                    RequestRow::read,
                )
                .optional()
                .map_err(|e| e.to_string())?;
            let Some(row) = row else {
                return Ok(None);
            };
            let request = row.into_record()?;
            let tasks = query_tasks(conn, "WHERE request_id = ?1 ORDER BY position", params![id_str])?;
            Ok(Some((request, tasks)))
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, String> {
        let id_str = id.to_string();
        self.with_conn(move |conn| {
            let mut tasks = query_tasks(conn, "WHERE id = ?1", params![id_str])?;
            Ok(tasks.pop())
        })
        .await
    }

    async fn list_requests(
        &self,
        filter: &RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestRecord>, String> {
        let requester = filter.requester.clone();
        let status = filter.status.map(|s| s.as_str());
        let since = filter.since.as_ref().map(ts);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM requests
                     WHERE (?1 IS NULL OR requester = ?1)
                       AND (?2 IS NULL OR status = ?2)
                       AND (?3 IS NULL OR created_at >= ?3)
                     ORDER BY created_at DESC LIMIT ?4 OFFSET ?5",
                    REQUEST_COLUMNS
                ))
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(
                    params![requester, status, since, limit as i64, offset as i64],
                    RequestRow::read,
                )
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            rows.into_iter().map(RequestRow::into_record).collect()
        })
        .await
    }

    async fn list_request_ids_by_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<RequestId>, String> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let statuses: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id FROM requests WHERE status IN ({}) ORDER BY created_at ASC",
                    status_placeholders(statuses.len())
                ))
                .map_err(|e| e.to_string())?;
            let ids = stmt
                .query_map(rusqlite::params_from_iter(statuses.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            ids.iter()
                .map(|id| parse_uuid(id).map(RequestId::from))
                .collect()
        })
        .await
    }

    async fn list_tasks_by_status(
        &self,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRecord>, String> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let statuses: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        self.with_conn(move |conn| {
            let clause = format!(
                "WHERE status IN ({}) ORDER BY created_at, position",
                status_placeholders(statuses.len())
            );
            query_tasks(conn, &clause, rusqlite::params_from_iter(statuses.iter()))
        })
        .await
    }

    async fn commit(&self, commit: &RequestCommit) -> Result<CommitOutcome, String> {
        let commit = commit.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| e.to_string())?;
            let request = &commit.request;

            let updated = tx
                .execute(
                    "UPDATE requests
                     SET status = ?1, terminal_reason = ?2, updated_at = ?3, version = ?4
                     WHERE id = ?5 AND version = ?6",
                    params![
                        request.status.as_str(),
                        request.terminal_reason.map(|r| r.as_str()),
                        ts(&request.updated_at),
                        request.version as i64,
                        request.id.to_string(),
                        commit.expected_version as i64,
                    ],
                )
                .map_err(|e| e.to_string())?;
            if updated == 0 {
                // Dropping the transaction rolls it back.
                return Ok(CommitOutcome::Conflict);
            }

            for update in &commit.tasks {
                let task = &update.record;
                let updated = tx
                    .execute(
                        "UPDATE tasks
                         SET status = ?1, assigned_worker = ?2, result_payload = ?3,
                             failure_reason = ?4, dispatched_at = ?5, started_at = ?6,
                             finished_at = ?7
                         WHERE id = ?8 AND status = ?9",
                        params![
                            task.status.as_str(),
                            task.assigned_worker.as_ref().map(|w| w.as_str().to_string()),
                            task.result_payload.as_ref().map(to_json).transpose()?,
                            task.failure_reason.as_ref().map(to_json).transpose()?,
                            opt_ts(&task.dispatched_at),
                            opt_ts(&task.started_at),
                            opt_ts(&task.finished_at),
                            task.id.to_string(),
                            update.expected.as_str(),
                        ],
                    )
                    .map_err(|e| e.to_string())?;
                if updated == 0 {
                    return Ok(CommitOutcome::Conflict);
                }
            }

            for transition in &commit.transitions {
                tx.execute(
                    "INSERT INTO task_transitions
                         (task_id, request_id, from_status, to_status, at, reason)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        transition.task_id.to_string(),
                        transition.request_id.to_string(),
                        transition.from.as_str(),
                        transition.to.as_str(),
                        ts(&transition.at),
                        transition.reason,
                    ],
                )
                .map_err(|e| format!("Failed to record transition: {}", e))?;
            }

            tx.commit().map_err(|e| e.to_string())?;
            Ok(CommitOutcome::Committed)
        })
        .await
    }

    async fn task_history(&self, id: TaskId) -> Result<Vec<TaskTransition>, String> {
        let id_str = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT task_id, request_id, from_status, to_status, at, reason
                     FROM task_transitions WHERE task_id = ?1 ORDER BY id ASC",
                )
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(params![id_str], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                })
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;

            rows.into_iter()
                .map(|(task_id, request_id, from, to, at, reason)| -> Result<TaskTransition, String> {
                    Ok(TaskTransition {
                        task_id: TaskId::from(parse_uuid(&task_id)?),
                        request_id: RequestId::from(parse_uuid(&request_id)?),
                        from: from.parse()?,
                        to: to.parse()?,
                        at: parse_ts(&at)?,
                        reason,
                    })
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceKind;
    use std::collections::BTreeMap;

    #[test]
    fn test_schema_declares_every_request_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.prepare(&format!("SELECT {} FROM requests", REQUEST_COLUMNS))
            .unwrap();
        conn.prepare(&format!("SELECT {} FROM tasks", TASK_COLUMNS))
            .unwrap();
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(250);
        assert!(ts(&early) < ts(&late));
        assert_eq!(ts(&early).len(), ts(&late).len());
        assert_eq!(parse_ts(&ts(&late)).unwrap(), late);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("orchestrator.db");
        let evidence = Evidence {
            id: EvidenceId::from("fedcba9876543210fedcba9876543210".to_string()),
            kind: EvidenceKind::GoogleCloudDisk,
            source_locator: "disk-1".to_string(),
            checksum: Some("sha256:ab".to_string()),
            name: Some("boot disk".to_string()),
            attributes: BTreeMap::from([
                ("project".to_string(), "forensics".to_string()),
                ("zone".to_string(), "us-central1-f".to_string()),
            ]),
            created_at: Utc::now(),
        };

        {
            let store = SqliteStore::new(path.clone()).await.unwrap();
            store.insert_evidence(&evidence).await.unwrap();
        }

        let reopened = SqliteStore::new(path).await.unwrap();
        let loaded = reopened.get_evidence(&evidence.id).await.unwrap().unwrap();
        assert_eq!(loaded, evidence);
    }
}
