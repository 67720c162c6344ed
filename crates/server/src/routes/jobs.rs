// crates/server/src/routes/jobs.rs
//! API routes for background job tracking.
//!
//! - GET /jobs — List tracked jobs
//! - GET /jobs/stream — SSE stream of job events
//! - GET /jobs/{id} — Poll one job
//! - POST /jobs/cleanup — Evict old finished jobs
//! - POST /jobs/demo — Launch a simulated job

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use jobtrack_jobs::{JobFilter, JobId, JobRecord, Metadata};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::demo::{run_demo, DemoJobRequest, DEMO_JOB_TYPE};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    /// Falls back to the server's configured max age.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CleanupResponse {
    pub evicted: usize,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// GET /api/jobs — List jobs, newest first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<JobFilter>,
) -> Json<Vec<JobRecord>> {
    Json(state.registry.list(&filter))
}

/// GET /api/jobs/{id} — Current state of one job.
///
/// Unknown and already-evicted jobs both return 404.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let job_id: JobId = id
        .parse()
        .map_err(|e: jobtrack_jobs::ParseJobIdError| ApiError::BadRequest(e.to_string()))?;

    state
        .registry
        .get(job_id)
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// GET /api/jobs/stream — SSE stream of every job event.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().event(event.kind.as_str()).data(json));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "job event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /api/jobs/cleanup — Evict finished jobs older than `max_age_secs`.
///
/// The JSON body is optional; without one the configured max age applies.
async fn cleanup_jobs(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<CleanupResponse>> {
    let request: CleanupRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid cleanup request: {e}")))?
    };
    let max_age = request
        .max_age_secs
        .map(Duration::from_secs)
        .unwrap_or(state.max_age);

    Ok(Json(CleanupResponse {
        evicted: state.registry.cleanup(max_age),
    }))
}

/// POST /api/jobs/demo — Launch a simulated job and return its id at once.
async fn submit_demo(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DemoJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    request.validate().map_err(ApiError::BadRequest)?;

    let mut metadata = Metadata::new();
    metadata.insert("steps".into(), request.steps.into());
    metadata.insert("step_ms".into(), request.step_ms.into());

    let job_id = state
        .executor
        .submit(DEMO_JOB_TYPE, metadata, move |progress| run_demo(request, progress));
    tracing::info!(job_id = %job_id, "demo job submitted");

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/cleanup", post(cleanup_jobs))
        .route("/jobs/demo", post(submit_demo))
        .route("/jobs/{id}", get(get_job))
}
