// crates/server-jobs/src/error.rs
use thiserror::Error;

use crate::types::JobId;

/// Errors surfaced synchronously by the registry and runner.
///
/// Failures of the crawl itself are never returned here: they are recorded
/// on the job record instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),
}

pub type JobResult<T> = Result<T, JobError>;
