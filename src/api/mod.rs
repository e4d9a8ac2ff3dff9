//! HTTP API for the evidence orchestrator.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check (public)
//! - `POST /api/evidence` - Register evidence
//! - `GET /api/evidence/types` - List supported evidence kinds
//! - `GET /api/evidence/{id}` - Look up registered evidence
//! - `GET /api/jobs` - List enabled task types
//! - `POST /api/requests` - Submit evidence plus a recipe
//! - `GET /api/requests` - List requests, newest first
//! - `GET /api/requests/{id}` - Poll a request snapshot
//! - `POST /api/requests/{id}/cancel` - Cancel a request
//! - `GET /api/tasks/{id}` - Task detail with its transition log
//! - `POST /api/tasks/{id}/report` - Worker status report
//! - `POST /api/workers` - Register a worker
//! - `DELETE /api/workers/{id}` - Deregister a worker
//! - `GET /api/workers/{id}/assignments` - Pull a worker's assignments
//! - `GET /api/stats` - Aggregate statistics

mod auth;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
