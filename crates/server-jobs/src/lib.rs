// crates/server-jobs/src/lib.rs
//! Crawl job orchestration for the tweet-harvest server.
//!
//! Provides:
//! - `JobRegistry`: in-memory job records and their life-cycle transitions
//! - `JobBroadcaster`: per-job fan-out of snapshots to live subscribers
//! - `JobRunner`: launches the opaque crawl and records its outcome
//! - `CrawlOperation`: the seam the external scraper plugs into

pub mod broadcaster;
pub mod error;
pub mod registry;
pub mod runner;
pub mod types;

pub use broadcaster::{JobBroadcaster, JobSink, Subscription, SubscriptionHandle};
pub use error::{JobError, JobResult};
pub use registry::{JobObserver, JobRegistry};
pub use runner::{CrawlOperation, CrawlOutcome, JobRunner, ProgressReporter};
pub use types::{
    CrawlParams, CrawlRequest, CrawlTarget, ExportFormat, Job, JobId, JobStatus, JobUpdate,
    SearchTab,
};
