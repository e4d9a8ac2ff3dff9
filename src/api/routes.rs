//! HTTP route handlers.

use std::sync::Arc;

use axum::middleware;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::dispatch::{TaskAssignment, WorkerId, WorkerInfo, WorkerReport};
use crate::error::OrchestratorError;
use crate::evidence::{Evidence, EvidenceDescriptor, EvidenceId};
use crate::orchestrator::{Orchestrator, OrchestratorOptions, Submission};
use crate::recipe::{JobInfo, JobRegistry};
use crate::scheduler::Scheduler;
use crate::status::{RequestSnapshot, RequestSummary, Stats, TaskDetail};
use crate::store::create_store;
use crate::task::{RequestId, RequestStatus, TaskId};
use crate::worker::{DryRunExecutor, LocalWorker};

use super::auth;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn api_error(err: OrchestratorError) -> (StatusCode, String) {
    let status = match &err {
        OrchestratorError::Validation(_) | OrchestratorError::Recipe(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound { .. } | OrchestratorError::UnknownTask(_) => {
            StatusCode::NOT_FOUND
        }
        OrchestratorError::InvalidTransition { .. } | OrchestratorError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::WorkerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    }
    (status, err.to_string())
}

/// Build the router over an existing orchestrator.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/api/health", get(health));

    let protected_routes = Router::new()
        .route("/api/evidence", post(register_evidence))
        .route("/api/evidence/types", get(list_evidence_types))
        .route("/api/evidence/:id", get(get_evidence))
        .route("/api/jobs", get(list_jobs))
        .route("/api/requests", post(submit_request).get(list_requests))
        .route("/api/requests/:id", get(get_request))
        .route("/api/requests/:id/cancel", post(cancel_request))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/report", post(report_task))
        .route("/api/workers", post(register_worker))
        .route("/api/workers/:id", delete(deregister_worker))
        .route("/api/workers/:id/assignments", get(get_assignments))
        .route("/api/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server together with the scheduler and any local workers.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = create_store(config.store_type, config.data_dir.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;

    let jobs = JobRegistry::builtin().filtered(
        &config.dispatch.jobs_allowlist,
        &config.dispatch.jobs_denylist,
    );
    tracing::info!("Enabled task types: {}", jobs.list().len());

    let orchestrator = Arc::new(
        Orchestrator::new(
            store,
            OrchestratorOptions {
                jobs,
                dispatch_timeout: config.dispatch.timeout,
            },
        )
        .await?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = vec![Scheduler::new(
        orchestrator.dispatcher().clone(),
        orchestrator.notify(),
        config.dispatch.interval,
    )
    .spawn(shutdown_rx.clone())];

    let output_dir = config.data_dir.join("outputs");
    for i in 0..config.dispatch.local_workers {
        let worker = LocalWorker::new(
            WorkerId::from(format!("local-{}", i)),
            1,
            Arc::clone(&orchestrator),
            Arc::new(DryRunExecutor::new(output_dir.clone())),
        );
        background.push(worker.spawn(shutdown_rx.clone()));
    }
    if config.dispatch.local_workers > 0 {
        tracing::info!(
            "Started {} local dry-run workers (output in {})",
            config.dispatch.local_workers,
            output_dir.display()
        );
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        orchestrator,
    });
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("Background task ended abnormally: {}", e);
        }
    }
    tracing::info!("Graceful shutdown complete");

    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping scheduler and workers...");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dev_mode: state.config.dev_mode,
        auth_required: state.config.auth.auth_required(state.config.dev_mode),
        persistent: state.orchestrator.is_persistent(),
    })
}

async fn register_evidence(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<EvidenceDescriptor>,
) -> ApiResult<Evidence> {
    let evidence = state
        .orchestrator
        .evidence()
        .register(&descriptor)
        .await
        .map_err(api_error)?;
    Ok(Json(evidence))
}

async fn list_evidence_types(State(state): State<Arc<AppState>>) -> Json<Vec<EvidenceKindInfo>> {
    Json(
        state
            .orchestrator
            .evidence()
            .list_kinds()
            .into_iter()
            .map(EvidenceKindInfo::from)
            .collect(),
    )
}

async fn get_evidence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Evidence> {
    let evidence = state
        .orchestrator
        .evidence()
        .lookup(&EvidenceId::from(id))
        .await
        .map_err(api_error)?;
    Ok(Json(evidence))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobInfo>> {
    Json(state.orchestrator.compiler().jobs().list())
}

/// Submit evidence plus a recipe.
async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<Submission>,
) -> ApiResult<SubmitResponse> {
    let request_id = state
        .orchestrator
        .submit(submission)
        .await
        .map_err(api_error)?;
    Ok(Json(SubmitResponse {
        request_id,
        status: RequestStatus::Queued,
    }))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRequestsQuery>,
) -> ApiResult<Vec<RequestSummary>> {
    let limit = query.limit.clamp(1, MAX_LIST_LIMIT);
    let filter = query.filter(chrono::Utc::now());
    let requests = state
        .orchestrator
        .status()
        .list(&filter, limit, query.offset)
        .await
        .map_err(api_error)?;
    Ok(Json(requests))
}

/// Poll a request. Never changes state.
async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RequestId>,
) -> ApiResult<RequestSnapshot> {
    let snapshot = state.orchestrator.get_status(id).await.map_err(api_error)?;
    Ok(Json(snapshot))
}

async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RequestId>,
) -> ApiResult<RequestSnapshot> {
    let snapshot = state.orchestrator.cancel(id).await.map_err(api_error)?;
    Ok(Json(snapshot))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> ApiResult<TaskDetail> {
    let detail = state.orchestrator.status().task(id).await.map_err(api_error)?;
    Ok(Json(detail))
}

/// Worker reports `running`, `success` or `failure` for a task it holds.
async fn report_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    Json(report): Json<WorkerReport>,
) -> ApiResult<ReportResponse> {
    let disposition = state
        .orchestrator
        .report_outcome(id, report)
        .await
        .map_err(api_error)?;
    Ok(Json(ReportResponse {
        task_id: id,
        disposition,
    }))
}

async fn register_worker(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterWorkerRequest>,
) -> ApiResult<WorkerInfo> {
    let info = state
        .orchestrator
        .dispatcher()
        .register_worker(req.worker_id, req.capacity)
        .map_err(api_error)?;
    Ok(Json(info))
}

async fn deregister_worker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let id = WorkerId::from(id);
    state
        .orchestrator
        .dispatcher()
        .deregister_worker(&id)
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "worker_id": id,
    })))
}

async fn get_assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<TaskAssignment>> {
    let assignments = state
        .orchestrator
        .dispatcher()
        .assignments(&WorkerId::from(id))
        .await
        .map_err(api_error)?;
    Ok(Json(assignments))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult<Stats> {
    let stats = state.orchestrator.status().stats().await.map_err(api_error)?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tower::ServiceExt;

    async fn test_app(dev_mode: bool, token: Option<&str>) -> (Router, Arc<Orchestrator>) {
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::new(InMemoryStore::new()), OrchestratorOptions::default())
                .await
                .unwrap(),
        );
        let mut config = Config::new(PathBuf::from("/tmp/orchestrator-test"));
        config.dev_mode = dev_mode;
        config.auth = AuthConfig {
            api_token: token.map(str::to_string),
        };
        let state = Arc::new(AppState {
            config,
            orchestrator: Arc::clone(&orchestrator),
        });
        (router(state), orchestrator)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_submit_dispatch_report_poll() {
        let (app, orchestrator) = test_app(true, None).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/requests",
            Some(json!({
                "evidence": {"kind": "rawdisk", "source_locator": "artifact_disk.dd"},
                "recipe": "name: plaso\ntasks:\n  - type: PlasoParserTask\n",
                "requester": "analyst",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        let request_id = body["request_id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/workers",
            Some(json!({"worker_id": "worker-1", "capacity": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        orchestrator.dispatcher().dispatch_ready_tasks().await.unwrap();

        let (status, assignments) =
            call(&app, Method::GET, "/api/workers/worker-1/assignments", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(assignments.as_array().unwrap().len(), 1);
        let task_id = assignments[0]["task_id"].as_str().unwrap().to_string();

        let (status, report) = call(
            &app,
            Method::POST,
            &format!("/api/tasks/{}/report", task_id),
            Some(json!({"status": "success", "result_payload": {"summary": "12 events"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["disposition"], "applied");

        let (status, snapshot) =
            call(&app, Method::GET, &format!("/api/requests/{}", request_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["status"], "successful");
        assert_eq!(snapshot["tasks"][0]["type"], "PlasoParserTask");
        assert_eq!(snapshot["tasks"][0]["result_summary"], "12 events");

        let (_, detail) = call(&app, Method::GET, &format!("/api/tasks/{}", task_id), None).await;
        assert_eq!(detail["history"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_error_status_codes() {
        let (app, _) = test_app(true, None).await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/requests",
            Some(json!({
                "evidence": {"kind": "rawdisk", "source_locator": "disk.dd"},
                "recipe": "tasks:\n  - type: NoSuchTask\n",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/requests/{}", RequestId::new()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/tasks/{}/report", TaskId::new()),
            Some(json!({"status": "running"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::DELETE, "/api/workers/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_report_on_queued_task_conflicts() {
        let (app, orchestrator) = test_app(true, None).await;
        let (_, body) = call(
            &app,
            Method::POST,
            "/api/requests",
            Some(json!({
                "evidence": {"kind": "textfile", "source_locator": "/evidence/notes.txt"},
                "recipe": "tasks:\n  - type: GrepTask\n",
            })),
        )
        .await;
        let request_id: RequestId = body["request_id"].as_str().unwrap().parse().unwrap();
        let snapshot = orchestrator.get_status(request_id).await.unwrap();

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/tasks/{}/report", snapshot.tasks[0].task_id),
            Some(json!({"status": "success"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_auth_gate() {
        let (app, _) = test_app(false, Some("s3cret")).await;

        let (status, health) = call(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["auth_required"], true);

        let (status, _) = call(&app, Method::GET, "/api/jobs", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/jobs")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (app, _) = test_app(false, None).await;
        let (status, _) = call(&app, Method::GET, "/api/stats", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_list_filters_and_requester_stats() {
        let (app, _) = test_app(true, None).await;
        let mut ids = Vec::new();
        for requester in ["alice", "bob"] {
            let (status, body) = call(
                &app,
                Method::POST,
                "/api/requests",
                Some(json!({
                    "evidence": {"kind": "textfile", "source_locator": "/evidence/notes.txt"},
                    "recipe": "tasks:\n  - type: GrepTask\n",
                    "requester": requester,
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            ids.push(body["request_id"].as_str().unwrap().to_string());
        }
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/requests/{}/cancel", ids[1]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, listed) = call(&app, Method::GET, "/api/requests?requester=alice", None).await;
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["request_id"], ids[0].as_str());
        assert!(listed[0].get("duration_secs").is_none());

        let (_, failed) = call(&app, Method::GET, "/api/requests?status=failed", None).await;
        let failed = failed.as_array().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["requester"], "bob");
        assert!(failed[0]["duration_secs"].is_number());

        let (_, recent) = call(&app, Method::GET, "/api/requests?days=1&limit=10", None).await;
        assert_eq!(recent.as_array().unwrap().len(), 2);

        let (status, _) = call(&app, Method::GET, "/api/requests?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, stats) = call(&app, Method::GET, "/api/stats", None).await;
        assert_eq!(stats["requesters"]["alice"]["requests"], 1);
        assert_eq!(stats["requesters"]["alice"]["by_status"]["queued"], 1);
        assert!(stats["requesters"]["alice"]["request_duration"].is_null());
        assert_eq!(stats["requesters"]["bob"]["request_duration"]["count"], 1);
        assert_eq!(stats["request_duration"]["count"], 1);
    }

    #[tokio::test]
    async fn test_evidence_endpoints() {
        let (app, _) = test_app(true, None).await;
        let (status, kinds) = call(&app, Method::GET, "/api/evidence/types", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(kinds
            .as_array()
            .unwrap()
            .iter()
            .any(|k| k["kind"] == "rawdisk"));

        let (status, evidence) = call(
            &app,
            Method::POST,
            "/api/evidence",
            Some(json!({"kind": "rawmemory", "source_locator": "/evidence/mem.raw"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = evidence["id"].as_str().unwrap().to_string();

        let (status, found) = call(&app, Method::GET, &format!("/api/evidence/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["source_locator"], "/evidence/mem.raw");

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/evidence",
            Some(json!({"kind": "floppy", "source_locator": "/evidence/a.img"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
