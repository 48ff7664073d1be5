//! Prometheus metrics for the backfill.
//!
//! This module provides metrics for:
//! - Dispatcher (jobs, rows, durations, in-flight)
//! - Resolution (venue fallbacks)
//! - Upstream requests
//! - Progress reporting

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Dispatcher Metrics
// =============================================================================

/// Jobs finished total by result.
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("backfill_jobs_total", "Total backfill jobs finished"),
        &["result"], // "succeeded", "failed"
    )
    .unwrap()
});

/// Job duration in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("backfill_job_duration_seconds", "Duration of a single job")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["result"],
    )
    .unwrap()
});

/// Jobs currently executing.
pub static JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("backfill_jobs_in_flight", "Jobs currently holding an admission slot").unwrap()
});

/// Bar rows persisted.
pub static ROWS_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("backfill_rows_written_total", "Total bar rows written to the store").unwrap()
});

/// Jobs abandoned by cancelled runs.
pub static JOBS_ABANDONED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "backfill_jobs_abandoned_total",
        "Jobs that never finished because the run was cancelled",
    )
    .unwrap()
});

// =============================================================================
// Resolution Metrics
// =============================================================================

/// Symbols resolved on a venue other than the first.
pub static VENUE_FALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "backfill_venue_fallbacks_total",
        "Symbols resolved on a fallback venue",
    )
    .unwrap()
});

// =============================================================================
// Upstream Metrics
// =============================================================================

/// Upstream request duration.
pub static UPSTREAM_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "backfill_upstream_duration_seconds",
            "Duration of upstream data requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"],
    )
    .unwrap()
});

/// Upstream requests total.
pub static UPSTREAM_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("backfill_upstream_requests_total", "Total upstream data requests"),
        &["operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Progress Metrics
// =============================================================================

/// Progress events dropped because the subscriber was slow or gone.
pub static PROGRESS_EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "backfill_progress_events_dropped_total",
        "Progress events dropped by a full or closed channel",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record a finished job.
pub fn record_job(succeeded: bool, rows: usize, elapsed: Duration) {
    let result = if succeeded { "succeeded" } else { "failed" };
    JOBS_TOTAL.with_label_values(&[result]).inc();
    JOB_DURATION
        .with_label_values(&[result])
        .observe(elapsed.as_secs_f64());
    ROWS_WRITTEN.inc_by(rows as u64);
}

/// Record an upstream request outcome.
pub fn record_upstream_request<T, E>(operation: &str, result: &Result<T, E>, elapsed: Duration) {
    let status = if result.is_ok() { "success" } else { "error" };
    UPSTREAM_REQUESTS
        .with_label_values(&[operation, status])
        .inc();
    UPSTREAM_DURATION
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64());
}

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Dispatcher
        Box::new(JOBS_TOTAL.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        Box::new(ROWS_WRITTEN.clone()),
        Box::new(JOBS_ABANDONED.clone()),
        // Resolution
        Box::new(VENUE_FALLBACKS.clone()),
        // Upstream
        Box::new(UPSTREAM_DURATION.clone()),
        Box::new(UPSTREAM_REQUESTS.clone()),
        // Progress
        Box::new(PROGRESS_EVENTS_DROPPED.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_all_metrics_register() {
        let registry = Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        record_job(true, 3, Duration::from_millis(20));

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "backfill_jobs_total"));
    }

    #[test]
    fn test_record_job_counts_rows() {
        let before = ROWS_WRITTEN.get();
        let succeeded_before = JOBS_TOTAL.with_label_values(&["succeeded"]).get();

        record_job(true, 7, Duration::from_millis(5));

        assert!(ROWS_WRITTEN.get() >= before + 7);
        assert!(JOBS_TOTAL.with_label_values(&["succeeded"]).get() > succeeded_before);
    }

    #[test]
    fn test_record_upstream_request() {
        let ok: Result<(), ()> = Ok(());
        let before = UPSTREAM_REQUESTS
            .with_label_values(&["test_op", "success"])
            .get();
        record_upstream_request("test_op", &ok, Duration::from_millis(1));
        assert_eq!(
            UPSTREAM_REQUESTS
                .with_label_values(&["test_op", "success"])
                .get(),
            before + 1
        );
    }
}
