//! Prometheus metrics for the orchestration layer.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`init_metrics`].

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// Metric names as constants for consistency
const JOBS_SUBMITTED_TOTAL: &str = "canvas_jobs_submitted_total";
const JOBS_REJECTED_TOTAL: &str = "canvas_jobs_rejected_total";
const JOBS_FINISHED_TOTAL: &str = "canvas_jobs_finished_total";
const JOBS_RUNNING: &str = "canvas_jobs_running";
const JOBS_PENDING: &str = "canvas_jobs_pending";
const SAVES_TOTAL: &str = "canvas_saves_total";
const STREAM_PAYLOADS_DROPPED_TOTAL: &str = "canvas_stream_payloads_dropped_total";
const UPLOADS_TOTAL: &str = "canvas_uploads_total";

/// Install the Prometheus recorder and return its handle.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record an accepted job.
pub fn record_job_submitted() {
    counter!(JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Record a submission rejected before queueing.
///
/// # Arguments
///
/// * `reason` - Short reason label (e.g. `empty_prompt`, `no_backend`)
pub fn record_job_rejected(reason: &'static str) {
    counter!(JOBS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a finished job.
pub fn record_job_finished(success: bool) {
    counter!(
        JOBS_FINISHED_TOTAL,
        "outcome" => if success { "done" } else { "error" }
    )
    .increment(1);
}

/// Update queue gauges.
pub fn set_queue_depth(running: usize, pending: usize) {
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!(JOBS_RUNNING).set(running as f64);
        gauge!(JOBS_PENDING).set(pending as f64);
    }
}

/// Record a save attempt series.
///
/// # Arguments
///
/// * `what` - `scene` or `viewport`
/// * `success` - Whether it finally succeeded
pub fn record_save(what: &'static str, success: bool) {
    counter!(SAVES_TOTAL, "kind" => what, "success" => success.to_string()).increment(1);
}

/// Record a reference upload.
pub fn record_upload(success: bool) {
    counter!(UPLOADS_TOTAL, "success" => success.to_string()).increment(1);
}

/// Record a stream payload that was dropped.
///
/// # Arguments
///
/// * `reason` - `malformed`, `unknown` or `stale`
pub fn record_dropped_payload(reason: &'static str) {
    counter!(STREAM_PAYLOADS_DROPPED_TOTAL, "reason" => reason).increment(1);
}
