// crates/server/src/metrics.rs
//! Application metrics for Prometheus monitoring.
//!
//! Job life-cycle metrics are recorded by `harvest-server-jobs` through the
//! `metrics` facade; this module installs the recorder, describes them, and
//! renders the exposition for `GET /metrics`. Recording before
//! [`init_metrics`] is a silent no-op, which is what tests rely on.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Serializes concurrent `init_metrics` calls (parallel tests).
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "crawl_jobs_submitted_total",
        "Crawl jobs accepted and launched"
    );
    describe_counter!(
        "crawl_jobs_finished_total",
        "Crawl jobs that reached a terminal state, by outcome"
    );
    describe_gauge!("crawl_jobs_running", "Crawl jobs currently running");
    describe_histogram!(
        "crawl_job_duration_seconds",
        "Wall-clock duration of crawl jobs in seconds"
    );
    describe_counter!(
        "artifact_requests_total",
        "Result store operations, by operation"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record one result store operation ("list", "read", "download", "delete").
pub fn record_artifact_request(operation: &'static str) {
    counter!("artifact_requests_total", "operation" => operation).increment(1);
}
