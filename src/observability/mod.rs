//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters and histograms via `metrics-rs`
//! - **Tracing**: structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `pipefold_elements_pulled` | Counter | Elements pulled from sources |
//! | `pipefold_elements_emitted` | Counter | Elements delivered downstream |
//! | `pipefold_elements_filtered` | Counter | Elements dropped by a transform |
//! | `pipefold_run_errors` | Counter | Failed runs, labeled by error kind |
//! | `pipefold_transform_time_ns` | Histogram | Time per transform call |
//!
//! Every metric carries a `pipeline` label taken from the runner's name.
//! Without an installed recorder all recording is a no-op.

mod metrics;
mod tracing_support;

pub use self::metrics::{RunMetrics, TimerGuard, init_metrics};
pub use self::tracing_support::{TracingConfig, span_run, trace_element, trace_run_finished};
