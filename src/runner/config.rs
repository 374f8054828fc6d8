//! Configuration for the parallel runner.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::observability::TracingConfig;

use super::cancel::CancelToken;

/// Default number of workers when the platform cannot tell us.
const FALLBACK_WORKERS: usize = 4;

/// In-flight elements allowed per worker unless overridden.
const IN_FLIGHT_PER_WORKER: usize = 4;

/// Number of workers matching the available parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

/// Configuration for the parallel fan-out/fan-in runner.
///
/// # Example
///
/// ```rust
/// use pipefold::runner::ParallelConfig;
/// use std::time::Duration;
///
/// let config = ParallelConfig::new(8)
///     .unordered()
///     .with_timeout(Duration::from_secs(30))
///     .with_name("thumbnails");
/// assert_eq!(config.window(), 32);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Name used for spans, logs and metric labels.
    pub name: String,
    /// Number of worker threads. Must be at least 1.
    pub workers: usize,
    /// Deliver results in source order (`true`) or completion order.
    pub preserve_order: bool,
    /// Maximum number of elements pulled but not yet released to the sink.
    ///
    /// Bounds the sequencing buffer. Defaults to four per worker.
    pub max_in_flight: Option<usize>,
    /// Capacity of the channel from workers to the coordinator.
    pub channel_capacity: usize,
    /// Cancel the run once this much time has passed since it started.
    pub timeout: Option<Duration>,
    /// External cancellation signal.
    pub cancel: Option<CancelToken>,
    /// Span and event settings.
    pub tracing: TracingConfig,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            workers: default_workers(),
            preserve_order: true,
            max_in_flight: None,
            channel_capacity: 16,
            timeout: None,
            cancel: None,
            tracing: TracingConfig::default(),
        }
    }
}

impl ParallelConfig {
    /// Create an order-preserving config with the given number of workers.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Choose whether results are delivered in source order.
    pub fn preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    /// Deliver results in source order.
    pub fn ordered(self) -> Self {
        self.preserve_order(true)
    }

    /// Deliver results as soon as they complete.
    pub fn unordered(self) -> Self {
        self.preserve_order(false)
    }

    /// Bound the number of elements in flight.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    /// Set the worker-to-coordinator channel capacity.
    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    /// Cancel the run after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an external cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set the name used in spans and metrics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set span and event behavior.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Effective in-flight window.
    pub fn window(&self) -> usize {
        self.max_in_flight
            .unwrap_or(self.workers.saturating_mul(IN_FLIGHT_PER_WORKER))
    }

    /// Check the config before a run.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.window() == 0 {
            return Err(Error::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
