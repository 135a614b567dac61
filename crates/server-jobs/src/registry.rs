// crates/server-jobs/src/registry.rs
//! In-memory registry of crawl jobs. The single source of truth for status.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{JobError, JobResult};
use crate::types::{CrawlParams, Job, JobId, JobStatus, JobUpdate};

/// Receives every committed job mutation, in commit order.
///
/// Called while the registry write lock is held: implementations must not
/// block and must not call back into the registry.
pub trait JobObserver: Send + Sync {
    fn job_updated(&self, job: &Job);
}

struct Entry {
    /// Insertion sequence, used to break `created_at` ties.
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<JobId, Entry>,
}

/// Owns every job record for the lifetime of the process.
///
/// Uses `std::sync::RwLock` because no lock is ever held across an `.await`.
/// Readers get cloned snapshots, so a record is always observed either
/// entirely before or entirely after an update.
pub struct JobRegistry {
    inner: RwLock<Inner>,
    observers: RwLock<Vec<Arc<dyn JobObserver>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for change notifications.
    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(e) => {
                tracing::error!("RwLock poisoned writing observers: {e}");
                e.into_inner().push(observer);
            }
        }
    }

    /// Create a `pending` job for the submission.
    pub fn create(&self, params: &CrawlParams) -> JobResult<Job> {
        let label = params.label()?;
        let job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            progress: 0,
            tweet_count: 0,
            label,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            output_file: None,
        };

        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );
        drop(inner);

        tracing::info!(job_id = %job.id, label = %job.label, "Job created");
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> JobResult<Job> {
        self.read()
            .jobs
            .get(&id)
            .map(|e| e.job.clone())
            .ok_or(JobError::NotFound(id))
    }

    /// All jobs, newest first. Equal timestamps: later insertion first.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Merge `patch` into the job and notify observers with the result.
    ///
    /// Life-cycle rules are enforced here rather than trusted to callers:
    /// illegal status changes are dropped, terminal fields are written once,
    /// and progress never moves backwards.
    pub fn update(&self, id: JobId, patch: JobUpdate) -> JobResult<Job> {
        let mut inner = self.write();
        let entry = inner.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;

        let mut next = entry.job.clone();
        apply_patch(&mut next, patch);
        entry.job = next.clone();

        // Notify under the write lock so delivery order matches commit order.
        for observer in self.observers_snapshot() {
            observer.job_updated(&next);
        }
        drop(inner);

        Ok(next)
    }

    /// Remove a job record. Never touches artifacts on disk.
    pub fn delete(&self, id: JobId) -> bool {
        let removed = self.write().jobs.remove(&id).is_some();
        if removed {
            tracing::info!(job_id = %id, "Job deleted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn JobObserver>> {
        match self.observers.read() {
            Ok(g) => g.clone(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading observers: {e}");
                e.into_inner().clone()
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading jobs map: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing jobs map: {e}");
            e.into_inner()
        })
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_patch(job: &mut Job, patch: JobUpdate) {
    let was_terminal = job.status.is_terminal();

    if let Some(status) = patch.status {
        if status != job.status {
            if job.status.can_transition_to(status) {
                tracing::info!(job_id = %job.id, from = %job.status, to = %status, "Job status changed");
                job.status = status;
            } else {
                tracing::warn!(
                    job_id = %job.id,
                    from = %job.status,
                    to = %status,
                    "Ignoring illegal job status transition"
                );
            }
        }
    }

    // Terminal fields are written exactly once, on the terminal transition.
    if !was_terminal && job.status.is_terminal() {
        job.completed_at = Some(patch.completed_at.unwrap_or_else(Utc::now));
        if job.status == JobStatus::Error {
            job.error = Some(patch.error.unwrap_or_else(|| "Unknown error".into()));
        }
    }

    if let Some(progress) = patch.progress {
        job.progress = job.progress.max(progress.min(100));
    }
    if let Some(count) = patch.tweet_count {
        job.tweet_count = count;
    }
    if let Some(file) = patch.output_file {
        job.output_file = Some(file);
    }
}
