// crates/server/src/routes/crawl.rs
//! Crawl job endpoints.
//!
//! - POST /crawl/start: submit a crawl, returns the job (already `running`)
//! - GET /crawl/status/{id}: current snapshot of one job
//! - GET /crawl/jobs: every job, newest first
//! - GET /crawl/events/{id}: SSE stream of snapshots for one job

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use harvest_server_jobs::{CrawlParams, Job, JobError, JobId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Malformed ids are reported exactly like unknown ones.
fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::JobNotFound(raw.to_string()))
}

/// POST /api/crawl/start
///
/// Bodies that fail to deserialize are validation errors like any other.
async fn start_crawl(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CrawlParams>, JsonRejection>,
) -> ApiResult<Json<Job>> {
    let Json(params) =
        payload.map_err(|e| ApiError::Job(JobError::Validation(e.body_text())))?;
    let job = state.runner.run(&params)?;
    Ok(Json(job))
}

/// GET /api/crawl/status/{id}
async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.get(id)?))
}

/// GET /api/crawl/jobs
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.registry.list())
}

/// GET /api/crawl/events/{id}
///
/// Emits the current snapshot first, then one `data:` event per registry
/// update. The stream ends once a terminal snapshot has been sent; a
/// disconnecting client drops its subscription with the stream.
async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let id = parse_job_id(&id)?;
    // Subscribe before reading the snapshot so no update falls in between.
    let mut subscription = state.broadcaster.subscribe_channel(id);
    let current = state.registry.get(id)?;
    tracing::debug!(job_id = %id, status = %current.status, "SSE client attached");

    let stream = async_stream::stream! {
        let mut next = Some(current);
        while let Some(job) = next.take() {
            let terminal = job.status.is_terminal();
            yield Ok(job_event(&job));
            if terminal {
                break;
            }
            // Snapshots can repeat a status; only a terminal one ends the stream.
            next = subscription.recv().await;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn job_event(job: &Job) -> Event {
    match serde_json::to_string(job) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Failed to serialize job snapshot");
            Event::default().comment("serialization error")
        }
    }
}

/// Build the crawl router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/crawl/start", post(start_crawl))
        .route("/crawl/status/{id}", get(job_status))
        .route("/crawl/jobs", get(list_jobs))
        .route("/crawl/events/{id}", get(job_events))
}
