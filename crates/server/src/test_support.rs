// crates/server/src/test_support.rs
//! Shared doubles for in-crate tests.

use std::sync::Arc;

use async_trait::async_trait;
use harvest_server_jobs::{CrawlOperation, CrawlOutcome, CrawlRequest, ProgressReporter};
use tempfile::TempDir;

use crate::results::ResultStore;
use crate::state::AppState;

/// Succeeds immediately without producing anything.
pub struct NoopCrawler;

#[async_trait]
impl CrawlOperation for NoopCrawler {
    async fn crawl(
        &self,
        _request: CrawlRequest,
        _progress: ProgressReporter,
    ) -> anyhow::Result<CrawlOutcome> {
        Ok(CrawlOutcome::default())
    }
}

/// Fresh state over an empty temp data directory. Keep the `TempDir` alive
/// for the duration of the test.
pub fn noop_state() -> (Arc<AppState>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(Arc::new(NoopCrawler), ResultStore::new(dir.path()));
    (state, dir)
}
