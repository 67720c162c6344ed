//! API route handlers for the jobtrack server.

pub mod health;
pub mod jobs;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/jobs - List jobs, filterable by `job_type` and `status`
/// - GET  /api/jobs/stream - SSE stream of job events
/// - GET  /api/jobs/{id} - Point-in-time job record
/// - POST /api/jobs/cleanup - Evict old finished jobs now
/// - POST /api/jobs/demo - Launch a simulated job
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router().merge(jobs::router()))
        .merge(metrics::router())
        .with_state(state)
}
