// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use harvest_server_jobs::{CrawlOperation, JobBroadcaster, JobRegistry, JobRunner};

use crate::config::Config;
use crate::crawler::CommandCrawler;
use crate::results::ResultStore;

/// Shared application state accessible from all route handlers.
///
/// One instance per process; tests build their own.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// In-memory job records.
    pub registry: Arc<JobRegistry>,
    /// Per-job live listeners, fed by the registry.
    pub broadcaster: Arc<JobBroadcaster>,
    /// Launches crawl jobs and records their outcome.
    pub runner: Arc<JobRunner>,
    /// Artifacts in the data directory.
    pub results: ResultStore,
}

impl AppState {
    /// Wire a registry, broadcaster and runner around `crawler`.
    pub fn new(crawler: Arc<dyn CrawlOperation>, results: ResultStore) -> Arc<Self> {
        let registry = Arc::new(JobRegistry::new());
        let broadcaster = Arc::new(JobBroadcaster::new());
        registry.add_observer(broadcaster.clone());
        let runner = Arc::new(JobRunner::new(registry.clone(), crawler));

        Arc::new(Self {
            start_time: Instant::now(),
            registry,
            broadcaster,
            runner,
            results,
        })
    }

    /// State for the binary: crawls run the configured scraper command.
    pub fn from_config(config: &Config) -> Arc<Self> {
        let results = ResultStore::new(&config.data_dir);
        let crawler = CommandCrawler::new(
            config.crawl_program.clone(),
            config.crawl_args(),
            results.clone(),
        );
        Self::new(Arc::new(crawler), results)
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::noop_state;
    use harvest_server_jobs::{CrawlParams, JobStatus};

    #[tokio::test]
    async fn test_app_state_new() {
        let (state, _dir) = noop_state();
        assert!(state.uptime_secs() < 1);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_runner_and_broadcaster_share_registry() {
        let (state, _dir) = noop_state();

        let params = CrawlParams {
            access_token: Some("x".into()),
            keywords: Some("#test".into()),
            ..CrawlParams::default()
        };
        let job = state.runner.run(&params).unwrap();
        assert_eq!(state.registry.len(), 1);

        let sub = state.broadcaster.subscribe_channel(job.id);
        assert_eq!(state.broadcaster.subscriber_count(job.id), 1);
        assert_eq!(state.runner.wait_for(job.id).await, Some(JobStatus::Completed));
        assert!(state.registry.get(job.id).unwrap().status.is_terminal());
        drop(sub);
        assert_eq!(state.broadcaster.subscriber_count(job.id), 0);
    }

    #[test]
    fn test_from_config_uses_data_dir() {
        use clap::Parser;
        let config =
            Config::try_parse_from(["tweet-harvest-server", "--data-dir", "/tmp/harvest-test"]).unwrap();
        let state = AppState::from_config(&config);
        assert_eq!(state.results.dir(), std::path::Path::new("/tmp/harvest-test"));
    }
}
