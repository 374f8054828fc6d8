//! Single-threaded source -> transform -> sink driver.

use crate::element::{Sink, Source, Transform};
use crate::error::{Error, Result};
use crate::observability::{RunMetrics, TracingConfig, trace_element};

use super::cancel::{CancelToken, StopCondition};
use super::{RunStats, finish};

/// Drives a pipeline one element at a time on the calling thread.
///
/// The loop pulls from the source until it reports exhaustion, applies the
/// transform, and hands every produced value to the sink in source order.
/// It stops at the first source failure, transform failure or cancellation;
/// nothing is pulled after that.
#[derive(Debug, Clone)]
pub struct SequentialRunner {
    name: String,
    cancel: Option<CancelToken>,
    tracing: TracingConfig,
}

impl Default for SequentialRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialRunner {
    /// Create a runner named `pipeline`.
    pub fn new() -> Self {
        Self {
            name: "pipeline".to_string(),
            cancel: None,
            tracing: TracingConfig::default(),
        }
    }

    /// Set the name used in spans and metrics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Check `token` before every pull.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set span and event behavior.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Get the runner name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `source` through `transform` into `sink`.
    pub fn run<S, T, K>(&self, source: &mut S, sink: &mut K, transform: &T) -> Result<RunStats>
    where
        S: Source + ?Sized,
        T: Transform<Input = S::Output> + ?Sized,
        K: Sink<Input = T::Output> + ?Sized,
    {
        let _span = self.tracing.enter_run(&self.name, "sequential");
        tracing::debug!(
            source = source.name(),
            transform = transform.name(),
            sink = sink.name(),
            "starting sequential run"
        );

        let metrics = RunMetrics::new(&self.name);
        let stop = StopCondition::new(self.cancel.as_ref(), None);
        let mut stats = RunStats::default();
        let result = self.drive(source, sink, transform, &stop, &metrics, &mut stats);
        finish(&self.name, &metrics, &stats, result.map(|()| stats))
    }

    fn drive<S, T, K>(
        &self,
        source: &mut S,
        sink: &mut K,
        transform: &T,
        stop: &StopCondition,
        metrics: &RunMetrics,
        stats: &mut RunStats,
    ) -> Result<()>
    where
        S: Source + ?Sized,
        T: Transform<Input = S::Output> + ?Sized,
        K: Sink<Input = T::Output> + ?Sized,
    {
        loop {
            if stop.is_triggered() {
                return Err(Error::Cancelled);
            }

            let item = match source.produce() {
                Ok(Some(item)) => item,
                Ok(None) => return Ok(()),
                Err(e) => return Err(Error::Source(e)),
            };
            let sequence = stats.pulled;
            stats.pulled += 1;
            metrics.record_pulled();

            let output = {
                let _timer = metrics.start_timer();
                transform.apply(item).map_err(Error::in_transform)?
            };

            let emitted = output.is_some();
            match output {
                Some(value) => {
                    sink.consume(value);
                    stats.emitted += 1;
                    metrics.record_emitted();
                }
                None => {
                    stats.filtered += 1;
                    metrics.record_filtered();
                }
            }
            if self.tracing.element_events {
                trace_element(&self.name, sequence, emitted);
            }
        }
    }
}
