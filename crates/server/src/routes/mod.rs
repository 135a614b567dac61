//! API route handlers for the tweet-harvest server.

pub mod crawl;
pub mod data;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix,
/// plus `/metrics` at the root.
///
/// Routes:
/// - GET    /api/health - Health check
/// - POST   /api/crawl/start - Submit a crawl job
/// - GET    /api/crawl/status/{id} - Snapshot of one job
/// - GET    /api/crawl/jobs - All jobs, newest first
/// - GET    /api/crawl/events/{id} - SSE stream of job snapshots
/// - GET    /api/data/list - Artifacts in the data directory
/// - GET    /api/data/{filename} - Decoded artifact rows
/// - GET    /api/data/download/{filename} - Raw artifact download
/// - DELETE /api/data/{filename} - Delete an artifact
/// - GET    /metrics - Prometheus exposition
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", crawl::router())
        .nest("/api", data::router())
        .merge(metrics::router())
        .with_state(state)
}
