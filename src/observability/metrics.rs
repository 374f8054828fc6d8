//! Metrics collection using metrics-rs.

use metrics::{Counter, Histogram, Unit, counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::Error;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const ELEMENTS_PULLED: &str = "pipefold_elements_pulled";
const ELEMENTS_EMITTED: &str = "pipefold_elements_emitted";
const ELEMENTS_FILTERED: &str = "pipefold_elements_filtered";
const RUN_ERRORS: &str = "pipefold_run_errors";
const TRANSFORM_TIME_NS: &str = "pipefold_transform_time_ns";

/// Initialize metrics descriptions.
///
/// Call this once at application startup, after installing a recorder.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        ELEMENTS_PULLED,
        Unit::Count,
        "Elements pulled from sources"
    );
    metrics::describe_counter!(
        ELEMENTS_EMITTED,
        Unit::Count,
        "Elements delivered to sinks or accumulators"
    );
    metrics::describe_counter!(
        ELEMENTS_FILTERED,
        Unit::Count,
        "Elements dropped by a filtering transform"
    );
    metrics::describe_counter!(RUN_ERRORS, Unit::Count, "Runs that ended in an error");
    metrics::describe_histogram!(
        TRANSFORM_TIME_NS,
        Unit::Nanoseconds,
        "Time spent in a single transform call"
    );
}

/// Metrics collector for one pipeline run.
///
/// Handles are resolved once per run, so recording per element is a plain
/// counter increment. Cloned into every worker of a parallel run.
#[derive(Clone)]
pub struct RunMetrics {
    pipeline: String,
    pulled: Counter,
    emitted: Counter,
    filtered: Counter,
    transform_time: Histogram,
}

impl RunMetrics {
    /// Create a metrics collector labeled with the pipeline name.
    pub fn new(pipeline: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            pulled: counter!(ELEMENTS_PULLED, "pipeline" => pipeline.to_string()),
            emitted: counter!(ELEMENTS_EMITTED, "pipeline" => pipeline.to_string()),
            filtered: counter!(ELEMENTS_FILTERED, "pipeline" => pipeline.to_string()),
            transform_time: histogram!(TRANSFORM_TIME_NS, "pipeline" => pipeline.to_string()),
        }
    }

    /// Record an element pulled from the source.
    #[inline]
    pub fn record_pulled(&self) {
        self.pulled.increment(1);
    }

    /// Record an element delivered downstream.
    #[inline]
    pub fn record_emitted(&self) {
        self.emitted.increment(1);
    }

    /// Record an element dropped by the transform.
    #[inline]
    pub fn record_filtered(&self) {
        self.filtered.increment(1);
    }

    /// Record the duration of one transform call.
    #[inline]
    pub fn record_transform_time(&self, duration: Duration) {
        self.transform_time.record(duration.as_nanos() as f64);
    }

    /// Start a timer that records transform time on drop.
    pub fn start_timer(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            metrics: self,
        }
    }

    /// Record the error that ended a run.
    pub fn record_error(&self, error: &Error) {
        counter!(RUN_ERRORS, "pipeline" => self.pipeline.clone(), "kind" => error.kind())
            .increment(1);
    }

    /// Get the pipeline name.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }
}

/// Guard that records transform time when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    metrics: &'a RunMetrics,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.metrics.record_transform_time(self.start.elapsed());
    }
}
