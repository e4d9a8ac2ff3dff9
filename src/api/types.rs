//! API request and response types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::{ReportDisposition, WorkerId};
use crate::evidence::EvidenceKind;
use crate::store::RequestFilter;
use crate::task::{RequestId, RequestStatus, TaskId};

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Whether the server is running in dev mode (auth disabled)
    pub dev_mode: bool,

    /// Whether auth is required for API requests
    pub auth_required: bool,

    /// Whether requests survive a restart
    pub persistent: bool,
}

/// Response after submitting a request.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub request_id: RequestId,
    pub status: RequestStatus,
}

/// Filters and pagination for the request listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListRequestsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub requester: Option<String>,
    pub status: Option<RequestStatus>,
    /// Only requests created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only requests from the last N days. Ignored when `since` is set.
    pub days: Option<u32>,
}

impl ListRequestsQuery {
    pub fn filter(&self, now: DateTime<Utc>) -> RequestFilter {
        let since = self
            .since
            .or_else(|| self.days.map(|days| now - Duration::days(i64::from(days))));
        RequestFilter {
            requester: self.requester.clone().filter(|r| !r.is_empty()),
            status: self.status,
            since,
        }
    }
}

fn default_limit() -> usize {
    50
}

/// Upper bound on one page of the request listing.
pub const MAX_LIST_LIMIT: usize = 500;

/// A supported evidence kind.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceKindInfo {
    pub kind: &'static str,
    pub description: &'static str,
    pub required_attributes: &'static [&'static str],
}

impl From<EvidenceKind> for EvidenceKindInfo {
    fn from(kind: EvidenceKind) -> Self {
        Self {
            kind: kind.as_str(),
            description: kind.description(),
            required_attributes: kind.required_attributes(),
        }
    }
}

/// Body of `POST /api/workers`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: WorkerId,
    /// Concurrent tasks the worker accepts
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1
}

/// Response to a worker report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    pub task_id: TaskId,
    pub disposition: ReportDisposition,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(json: serde_json::Value) -> ListRequestsQuery {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_list_query_builds_filter() {
        let now = Utc::now();

        let q = query(serde_json::json!({}));
        assert_eq!(q.limit, 50);
        assert_eq!(q.filter(now), RequestFilter::default());

        let q = query(serde_json::json!({"requester": "alice", "status": "failed", "days": 7}));
        let filter = q.filter(now);
        assert_eq!(filter.requester.as_deref(), Some("alice"));
        assert_eq!(filter.status, Some(RequestStatus::Failed));
        assert_eq!(filter.since, Some(now - Duration::days(7)));
    }

    #[test]
    fn test_since_wins_over_days() {
        let now = Utc::now();
        let q = query(serde_json::json!({"since": "2024-01-01T00:00:00Z", "days": 1}));
        assert_eq!(
            q.filter(now).since.unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
    }
}
