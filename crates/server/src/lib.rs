// crates/server/src/lib.rs
//! Tweet-harvest orchestration server library.
//!
//! Accepts crawl submissions over HTTP, runs each crawl as a background job
//! tracked in memory, pushes job snapshots to live SSE listeners, and serves
//! the CSV/XLSX artifacts the crawler leaves in the data directory.

pub mod config;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod results;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use crawler::CommandCrawler;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use results::{DataFile, ResultStore, ResultStoreError, TweetRecord};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, crawl, data) and `/metrics`
/// - CORS allowing any origin (the web client is served from another port)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
