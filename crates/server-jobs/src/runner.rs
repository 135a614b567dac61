// crates/server-jobs/src/runner.rs
//! Bridges the opaque, long-running crawl operation into registry transitions.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::watch;

use crate::error::{JobError, JobResult};
use crate::registry::JobRegistry;
use crate::types::{CrawlParams, CrawlRequest, Job, JobId, JobStatus, JobUpdate};

/// What a successful crawl produced, as far as the operation knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlOutcome {
    /// Artifact filename inside the data directory.
    pub output_file: Option<String>,
    pub tweet_count: Option<u64>,
}

/// The external scraping operation.
///
/// Treated as opaque: unbounded duration, and it may leave an artifact behind
/// even when it fails.
#[async_trait]
pub trait CrawlOperation: Send + Sync {
    async fn crawl(
        &self,
        request: CrawlRequest,
        progress: ProgressReporter,
    ) -> anyhow::Result<CrawlOutcome>;
}

/// Handed to the crawl operation so it can report records fetched so far.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    target_count: u32,
    registry: Arc<JobRegistry>,
}

impl ProgressReporter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Record `tweet_count` records fetched. Progress is derived from the
    /// target count and held below 100 until the job completes.
    pub fn report(&self, tweet_count: u64) {
        let target = u64::from(self.target_count.max(1));
        let progress = (tweet_count.saturating_mul(100) / target).min(99) as u8;
        let patch = JobUpdate {
            progress: Some(progress),
            tweet_count: Some(tweet_count),
            ..JobUpdate::default()
        };
        if let Err(e) = self.registry.update(self.job_id, patch) {
            tracing::debug!(job_id = %self.job_id, error = %e, "Progress for a deleted job dropped");
        }
    }
}

type Completion = watch::Receiver<Option<JobStatus>>;

/// Launches crawl jobs and records exactly one terminal transition per job.
///
/// There is no admission control and no cancellation: every submission runs
/// as its own task, and a crawl that never returns leaves its job `running`.
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    crawler: Arc<dyn CrawlOperation>,
    completions: Mutex<HashMap<JobId, Completion>>,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, crawler: Arc<dyn CrawlOperation>) -> Self {
        Self {
            registry,
            crawler,
            completions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Submit a job using the configured crawl operation.
    pub fn run(&self, params: &CrawlParams) -> JobResult<Job> {
        self.run_with(params, Arc::clone(&self.crawler))
    }

    /// Validate, register and launch a job on `crawler`.
    ///
    /// Returns as soon as the job is `running`; the crawl continues on a
    /// spawned task. Must be called from within a Tokio runtime.
    pub fn run_with(&self, params: &CrawlParams, crawler: Arc<dyn CrawlOperation>) -> JobResult<Job> {
        // Validation happens before any registry mutation.
        let request = params.to_request()?;
        let job = self.registry.create(params)?;
        let job = self
            .registry
            .update(job.id, JobUpdate::status(JobStatus::Running))?;

        let (done_tx, done_rx) = watch::channel(None);
        self.lock().insert(job.id, done_rx);

        metrics::counter!("crawl_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job.id, request = ?request, "Crawl job started");

        let registry = Arc::clone(&self.registry);
        let reporter = ProgressReporter {
            job_id: job.id,
            target_count: request.target_count,
            registry: Arc::clone(&registry),
        };
        let job_id = job.id;
        tokio::spawn(async move {
            let started = Instant::now();
            metrics::gauge!("crawl_jobs_running").increment(1.0);

            let result = AssertUnwindSafe(crawler.crawl(request, reporter))
                .catch_unwind()
                .await;
            let update = terminal_update(job_id, result);
            let intended = update.status.unwrap_or(JobStatus::Error);

            let status = match registry.update(job_id, update) {
                Ok(job) => job.status,
                Err(JobError::NotFound(_)) => {
                    tracing::debug!(job_id = %job_id, "Job deleted before its crawl finished");
                    intended
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record crawl outcome");
                    intended
                }
            };

            metrics::gauge!("crawl_jobs_running").decrement(1.0);
            metrics::counter!("crawl_jobs_finished_total", "outcome" => status.as_str())
                .increment(1);
            metrics::histogram!("crawl_job_duration_seconds")
                .record(started.elapsed().as_secs_f64());

            // Nobody waiting is fine.
            let _ = done_tx.send(Some(status));
        });

        Ok(job)
    }

    /// Remove a job from the registry along with its completion handle.
    ///
    /// A crawl still in flight keeps running; its outcome is dropped.
    pub fn delete(&self, job_id: JobId) -> bool {
        let tracked = self.lock().remove(&job_id).is_some();
        self.registry.delete(job_id) || tracked
    }

    /// Resolve once the job's crawl has finished, with the terminal status.
    ///
    /// `None` if the job was never launched by this runner, was deleted
    /// through [`JobRunner::delete`], or its task was torn down before
    /// recording an outcome.
    pub async fn wait_for(&self, job_id: JobId) -> Option<JobStatus> {
        let mut rx = self.lock().get(&job_id).cloned()?;
        rx.wait_for(Option::is_some).await.ok().and_then(|s| *s)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Completion>> {
        self.completions.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on job completions: {e}");
            e.into_inner()
        })
    }
}

fn terminal_update(
    job_id: JobId,
    result: Result<anyhow::Result<CrawlOutcome>, Box<dyn Any + Send>>,
) -> JobUpdate {
    match result {
        Ok(Ok(outcome)) => {
            tracing::info!(
                job_id = %job_id,
                output_file = ?outcome.output_file,
                tweet_count = ?outcome.tweet_count,
                "Crawl job completed"
            );
            JobUpdate {
                tweet_count: outcome.tweet_count,
                output_file: outcome.output_file,
                ..JobUpdate::completed(Utc::now())
            }
        }
        Ok(Err(e)) => {
            let message = format!("{e:#}");
            let message = if message.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                message
            };
            tracing::warn!(job_id = %job_id, error = %message, "Crawl job failed");
            JobUpdate::failed(message, Utc::now())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(job_id = %job_id, panic = %message, "Crawl task panicked");
            JobUpdate::failed(format!("Crawl task panicked: {message}"), Utc::now())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::JobBroadcaster;
    use tokio::sync::Notify;

    fn params(keywords: Option<&str>) -> CrawlParams {
        CrawlParams {
            access_token: Some("x".into()),
            keywords: keywords.map(String::from),
            target_count: Some(10),
            ..CrawlParams::default()
        }
    }

    /// Succeeds after reporting some progress, once released.
    struct GatedCrawler {
        gate: Arc<Notify>,
        outcome: CrawlOutcome,
    }

    #[async_trait]
    impl CrawlOperation for GatedCrawler {
        async fn crawl(
            &self,
            _request: CrawlRequest,
            progress: ProgressReporter,
        ) -> anyhow::Result<CrawlOutcome> {
            self.gate.notified().await;
            progress.report(5);
            Ok(self.outcome.clone())
        }
    }

    struct FailingCrawler(&'static str);

    #[async_trait]
    impl CrawlOperation for FailingCrawler {
        async fn crawl(
            &self,
            _request: CrawlRequest,
            _progress: ProgressReporter,
        ) -> anyhow::Result<CrawlOutcome> {
            Err(anyhow::anyhow!(self.0))
        }
    }

    struct PanickingCrawler;

    #[async_trait]
    impl CrawlOperation for PanickingCrawler {
        async fn crawl(
            &self,
            _request: CrawlRequest,
            _progress: ProgressReporter,
        ) -> anyhow::Result<CrawlOutcome> {
            panic!("selector not found");
        }
    }

    fn runner_with(crawler: Arc<dyn CrawlOperation>) -> JobRunner {
        JobRunner::new(Arc::new(JobRegistry::new()), crawler)
    }

    #[tokio::test]
    async fn test_run_is_running_then_completed() {
        let gate = Arc::new(Notify::new());
        let runner = runner_with(Arc::new(GatedCrawler {
            gate: Arc::clone(&gate),
            outcome: CrawlOutcome::default(),
        }));

        let job = runner.run(&params(Some("#test"))).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(
            runner.registry().get(job.id).unwrap().status,
            JobStatus::Running
        );

        gate.notify_one();
        assert_eq!(runner.wait_for(job.id).await, Some(JobStatus::Completed));

        let done = runner.registry().get(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.tweet_count, 5);
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_run_records_outcome_fields() {
        let gate = Arc::new(Notify::new());
        gate.notify_one();
        let runner = runner_with(Arc::new(GatedCrawler {
            gate,
            outcome: CrawlOutcome {
                output_file: Some("test_2026.csv".into()),
                tweet_count: Some(10),
            },
        }));

        let job = runner.run(&params(Some("#test"))).unwrap();
        runner.wait_for(job.id).await;

        let done = runner.registry().get(job.id).unwrap();
        assert_eq!(done.output_file.as_deref(), Some("test_2026.csv"));
        assert_eq!(done.tweet_count, 10);
    }

    #[tokio::test]
    async fn test_run_failure_is_recorded_on_job() {
        let runner = runner_with(Arc::new(FailingCrawler("login rejected")));

        let job = runner.run(&params(Some("#test"))).unwrap();
        assert_eq!(runner.wait_for(job.id).await, Some(JobStatus::Error));

        let failed = runner.registry().get(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("login rejected"));
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_run_empty_error_message_becomes_unknown() {
        let runner = runner_with(Arc::new(FailingCrawler("")));
        let job = runner.run(&params(Some("#test"))).unwrap();
        runner.wait_for(job.id).await;

        assert_eq!(
            runner.registry().get(job.id).unwrap().error.as_deref(),
            Some("Unknown error")
        );
    }

    #[tokio::test]
    async fn test_run_panic_is_contained() {
        let runner = runner_with(Arc::new(PanickingCrawler));
        let job = runner.run(&params(Some("#test"))).unwrap();
        assert_eq!(runner.wait_for(job.id).await, Some(JobStatus::Error));

        let failed = runner.registry().get(job.id).unwrap();
        assert!(failed.error.unwrap().contains("selector not found"));
    }

    #[tokio::test]
    async fn test_run_validation_creates_no_job() {
        let runner = runner_with(Arc::new(FailingCrawler("unused")));

        let err = runner.run(&params(None)).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));

        let mut no_token = params(Some("#test"));
        no_token.access_token = None;
        assert!(matches!(
            runner.run(&no_token),
            Err(JobError::Validation(_))
        ));

        assert!(runner.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_with_overrides_default_crawler() {
        let runner = runner_with(Arc::new(FailingCrawler("default")));
        let gate = Arc::new(Notify::new());
        gate.notify_one();
        let other: Arc<dyn CrawlOperation> = Arc::new(GatedCrawler {
            gate,
            outcome: CrawlOutcome::default(),
        });

        let job = runner.run_with(&params(Some("#test")), other).unwrap();
        assert_eq!(runner.wait_for(job.id).await, Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_wait_for_unknown_job() {
        let runner = runner_with(Arc::new(FailingCrawler("unused")));
        assert_eq!(runner.wait_for(uuid::Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn test_delete_forgets_job_and_completion() {
        let runner = runner_with(Arc::new(FailingCrawler("login rejected")));
        let job = runner.run(&params(Some("#test"))).unwrap();
        assert_eq!(runner.wait_for(job.id).await, Some(JobStatus::Error));

        assert!(runner.delete(job.id));
        assert_eq!(runner.wait_for(job.id).await, None);
        assert_eq!(runner.registry().get(job.id), Err(JobError::NotFound(job.id)));
        assert!(runner.lock().is_empty());
        assert!(!runner.delete(job.id));
    }

    #[tokio::test]
    async fn test_delete_while_running_drops_outcome() {
        let gate = Arc::new(Notify::new());
        let runner = runner_with(Arc::new(GatedCrawler {
            gate: Arc::clone(&gate),
            outcome: CrawlOutcome::default(),
        }));
        let job = runner.run(&params(Some("#test"))).unwrap();

        assert!(runner.delete(job.id));
        assert_eq!(runner.wait_for(job.id).await, None);
        gate.notify_one();
        tokio::task::yield_now().await;
        assert!(runner.registry().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_sees_status_sequence() {
        let registry = Arc::new(JobRegistry::new());
        let broadcaster = Arc::new(JobBroadcaster::new());
        registry.add_observer(broadcaster.clone());

        let gate = Arc::new(Notify::new());
        let runner = JobRunner::new(
            Arc::clone(&registry),
            Arc::new(GatedCrawler {
                gate: Arc::clone(&gate),
                outcome: CrawlOutcome::default(),
            }),
        );

        let job = runner.run(&params(Some("#test"))).unwrap();
        let mut sub = broadcaster.subscribe_channel(job.id);
        gate.notify_one();
        runner.wait_for(job.id).await;

        let progress = sub.recv().await.unwrap();
        assert_eq!(progress.status, JobStatus::Running);
        assert_eq!(progress.progress, 50);

        let done = sub.recv().await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
    }

    #[tokio::test]
    async fn test_jobs_run_independently() {
        let slow_gate = Arc::new(Notify::new());
        let runner = runner_with(Arc::new(GatedCrawler {
            gate: Arc::clone(&slow_gate),
            outcome: CrawlOutcome::default(),
        }));
        let slow = runner.run(&params(Some("slow"))).unwrap();

        let fast = runner
            .run_with(&params(Some("fast")), Arc::new(FailingCrawler("fast failure")))
            .unwrap();
        assert_eq!(runner.wait_for(fast.id).await, Some(JobStatus::Error));
        assert_eq!(
            runner.registry().get(slow.id).unwrap().status,
            JobStatus::Running
        );

        slow_gate.notify_one();
        assert_eq!(runner.wait_for(slow.id).await, Some(JobStatus::Completed));
    }
}
