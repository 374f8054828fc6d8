//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

use crate::error::Error;
use crate::runner::RunStats;

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to open a span around each run.
    pub run_spans: bool,
    /// Whether to emit a `trace!` event per element. Can be expensive.
    pub element_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            run_spans: true,
            element_events: false,
        }
    }
}

impl TracingConfig {
    /// Spans and per-element events.
    pub fn all() -> Self {
        Self {
            run_spans: true,
            element_events: true,
        }
    }

    /// Disable all spans and per-element events.
    pub fn none() -> Self {
        Self {
            run_spans: false,
            element_events: false,
        }
    }

    /// Enter a run span if enabled.
    pub(crate) fn enter_run(&self, name: &str, mode: &'static str) -> tracing::span::EnteredSpan {
        if self.run_spans {
            span_run(name, mode).entered()
        } else {
            Span::none().entered()
        }
    }
}

/// Create a span for a pipeline run.
///
/// `mode` is one of `sequential`, `parallel`, `fold` or `fold_parallel`.
#[inline]
pub fn span_run(name: &str, mode: &'static str) -> Span {
    span!(Level::INFO, "pipeline_run", name = %name, mode = mode)
}

/// Log one element passing through a run.
#[inline]
pub fn trace_element(pipeline: &str, sequence: u64, emitted: bool) {
    tracing::trace!(
        pipeline = %pipeline,
        sequence = sequence,
        emitted = emitted,
        "element processed"
    );
}

/// Log the end of a run, successful or not.
pub fn trace_run_finished(pipeline: &str, stats: &RunStats, outcome: Option<&Error>) {
    match outcome {
        None => tracing::debug!(
            pipeline = %pipeline,
            pulled = stats.pulled,
            emitted = stats.emitted,
            filtered = stats.filtered,
            "run finished"
        ),
        Some(Error::Cancelled) => tracing::warn!(
            pipeline = %pipeline,
            pulled = stats.pulled,
            emitted = stats.emitted,
            "run cancelled"
        ),
        Some(error) => tracing::warn!(
            pipeline = %pipeline,
            pulled = stats.pulled,
            emitted = stats.emitted,
            error = %error,
            "run failed"
        ),
    }
}
