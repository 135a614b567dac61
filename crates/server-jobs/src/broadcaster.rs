// crates/server-jobs/src/broadcaster.rs
//! Per-job fan-out of job snapshots to live subscribers (SSE sessions).
//!
//! There is no buffering or replay. A subscriber only sees updates published
//! after it subscribed; a client that needs the current state on connect
//! reads it from the registry separately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::registry::JobObserver;
use crate::types::{Job, JobId};

/// Delivery target for job snapshots.
pub type JobSink = mpsc::UnboundedSender<Job>;

/// Identifies one subscription. Unsubscribing with it is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub job_id: JobId,
    id: u64,
}

struct Subscriber {
    id: u64,
    sink: JobSink,
}

/// Fans out registry updates to subscribers of the matching job id.
pub struct JobBroadcaster {
    next_id: AtomicU64,
    // Vec per job keeps delivery in subscription order.
    subscribers: Mutex<HashMap<JobId, Vec<Subscriber>>>,
}

impl JobBroadcaster {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register `sink` for updates to `job_id`. Several subscriptions per job
    /// are allowed.
    pub fn subscribe(&self, job_id: JobId, sink: JobSink) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(job_id)
            .or_default()
            .push(Subscriber { id, sink });
        tracing::debug!(job_id = %job_id, subscription = id, "Subscriber added");
        SubscriptionHandle { job_id, id }
    }

    /// Subscribe with a fresh channel; the returned [`Subscription`]
    /// unsubscribes itself when dropped.
    pub fn subscribe_channel(self: &Arc<Self>, job_id: JobId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(job_id, tx);
        Subscription {
            handle,
            rx,
            broadcaster: Arc::clone(self),
        }
    }

    /// Deliver `job` to every subscriber of `job.id`, in subscription order.
    ///
    /// Sinks whose receiver is gone are dropped; this never fails.
    pub fn publish(&self, job: &Job) {
        let mut subscribers = self.lock();
        let Some(list) = subscribers.get_mut(&job.id) else {
            return;
        };

        list.retain(|sub| match sub.sink.send(job.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(job_id = %job.id, subscription = sub.id, "Dropping disconnected subscriber");
                false
            }
        });

        if list.is_empty() {
            subscribers.remove(&job.id);
        }
    }

    /// Remove a subscription. Unknown or already-removed handles are ignored.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut subscribers = self.lock();
        if let Some(list) = subscribers.get_mut(&handle.job_id) {
            list.retain(|sub| sub.id != handle.id);
            if list.is_empty() {
                subscribers.remove(&handle.job_id);
            }
        }
    }

    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.lock().get(&job_id).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Vec<Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on subscriber map: {e}");
            e.into_inner()
        })
    }
}

impl Default for JobBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl JobObserver for JobBroadcaster {
    fn job_updated(&self, job: &Job) {
        self.publish(job);
    }
}

/// A live subscription that owns its receiving end.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<Job>,
    broadcaster: Arc<JobBroadcaster>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Next published snapshot. `None` only if the broadcaster dropped the sink.
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn job(id: JobId, status: JobStatus) -> Job {
        Job {
            id,
            status,
            progress: 0,
            tweet_count: 0,
            label: "#test".into(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            output_file: None,
        }
    }

    #[test]
    fn test_publish_reaches_all_matching_subscribers() {
        let broadcaster = JobBroadcaster::new();
        let id = Uuid::new_v4();
        let mut receivers: Vec<_> = (0..3)
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                broadcaster.subscribe(id, tx);
                rx
            })
            .collect();

        let snapshot = job(id, JobStatus::Running);
        broadcaster.publish(&snapshot);

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), snapshot);
        }
    }

    #[test]
    fn test_publish_ignores_other_jobs() {
        let broadcaster = JobBroadcaster::new();
        let mine = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.subscribe(mine, tx);

        broadcaster.publish(&job(Uuid::new_v4(), JobStatus::Running));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let broadcaster = JobBroadcaster::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = broadcaster.subscribe(id, tx);

        broadcaster.unsubscribe(handle);
        broadcaster.unsubscribe(handle);
        broadcaster.publish(&job(id, JobStatus::Running));

        assert!(rx.try_recv().is_err());
        assert_eq!(broadcaster.subscriber_count(id), 0);
    }

    #[test]
    fn test_dead_sink_does_not_block_others() {
        let broadcaster = JobBroadcaster::new();
        let id = Uuid::new_v4();

        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let dead = broadcaster.subscribe(id, dead_tx);
        drop(dead_rx);
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.subscribe(id, tx);

        broadcaster.publish(&job(id, JobStatus::Running));

        assert_eq!(rx.try_recv().unwrap().status, JobStatus::Running);
        assert_eq!(broadcaster.subscriber_count(id), 1);
        // The sink already detached itself; unsubscribing afterwards is fine.
        broadcaster.unsubscribe(dead);
    }

    #[test]
    fn test_delivery_preserves_publish_order() {
        let broadcaster = JobBroadcaster::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.subscribe(id, tx);

        for status in [JobStatus::Running, JobStatus::Running, JobStatus::Completed] {
            broadcaster.publish(&job(id, status));
        }

        let received: Vec<JobStatus> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|j| j.status)
            .collect();
        assert_eq!(
            received,
            vec![JobStatus::Running, JobStatus::Running, JobStatus::Completed]
        );
    }

    #[test]
    fn test_late_subscriber_gets_no_replay() {
        let broadcaster = JobBroadcaster::new();
        let id = Uuid::new_v4();
        broadcaster.publish(&job(id, JobStatus::Running));

        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.subscribe(id, tx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_guard_unsubscribes_on_drop() {
        let broadcaster = Arc::new(JobBroadcaster::new());
        let id = Uuid::new_v4();

        let mut sub = broadcaster.subscribe_channel(id);
        assert_eq!(broadcaster.subscriber_count(id), 1);

        broadcaster.publish(&job(id, JobStatus::Running));
        assert_eq!(sub.recv().await.unwrap().status, JobStatus::Running);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(id), 0);
    }
}
