//! Pipeline runners.
//!
//! - [`SequentialRunner`]: one element at a time on the calling thread, total
//!   order preserved.
//! - [`ParallelRunner`]: a fixed pool of worker threads pulling from a
//!   serialized source, with results delivered in source order or in
//!   completion order.
//!
//! Both runners borrow the source and sink for the duration of one call and
//! keep no reference to them afterward. Both stop at the first failure and
//! return exactly one error, tagged with the stage that produced it.

mod cancel;
mod config;
mod parallel;
mod sequential;

pub use cancel::CancelToken;
pub use config::{ParallelConfig, default_workers};
pub use parallel::ParallelRunner;
pub use sequential::SequentialRunner;

pub(crate) use cancel::StopCondition;

use crate::element::{Sink, Source, Transform};
use crate::error::{Result, StageResult};
use crate::observability::{RunMetrics, trace_run_finished};
use crate::operators::{try_filter, try_map};

/// Counters describing one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Elements successfully pulled from the source.
    pub pulled: u64,
    /// Elements delivered to the sink.
    pub emitted: u64,
    /// Elements dropped by the transform.
    pub filtered: u64,
}

/// Log the outcome of a run and record failures.
pub(crate) fn finish<T>(
    name: &str,
    metrics: &RunMetrics,
    stats: &RunStats,
    result: Result<T>,
) -> Result<T> {
    match &result {
        Ok(_) => trace_run_finished(name, stats, None),
        Err(e) => {
            metrics.record_error(e);
            trace_run_finished(name, stats, Some(e));
        }
    }
    result
}

/// Run `source` through `transform` into `sink` on the calling thread.
pub fn run<S, T, K>(source: &mut S, sink: &mut K, transform: &T) -> Result<RunStats>
where
    S: Source + ?Sized,
    T: Transform<Input = S::Output> + ?Sized,
    K: Sink<Input = T::Output> + ?Sized,
{
    SequentialRunner::new().run(source, sink, transform)
}

/// Map every element with a fallible `mapper` and deliver the results in order.
///
/// ```rust
/// use pipefold::runner::run_map;
/// use pipefold::sinks::collect;
/// use pipefold::sources::from_iter;
///
/// let mut source = from_iter(["1", "10", "11"]);
/// let mut sink = collect();
/// run_map(&mut source, &mut sink, |s: &str| Ok(u32::from_str_radix(s, 2)?)).unwrap();
/// assert_eq!(sink.into_inner(), vec![1, 2, 3]);
/// ```
pub fn run_map<S, K, F, Out>(source: &mut S, sink: &mut K, mapper: F) -> Result<RunStats>
where
    S: Source + ?Sized,
    K: Sink<Input = Out> + ?Sized,
    F: Fn(S::Output) -> StageResult<Out> + Send + Sync,
    Out: Send + 'static,
{
    run(source, sink, &try_map(mapper))
}

/// Forward the elements for which a fallible `predicate` holds, in order.
pub fn run_filter<S, K, F>(source: &mut S, sink: &mut K, predicate: F) -> Result<RunStats>
where
    S: Source + ?Sized,
    K: Sink<Input = S::Output> + ?Sized,
    F: Fn(&S::Output) -> StageResult<bool> + Send + Sync,
{
    run(source, sink, &try_filter(predicate))
}

/// Run `source` through `transform` into `sink` on a worker pool.
pub fn run_parallel<S, T, K>(
    source: &mut S,
    sink: &mut K,
    transform: &T,
    config: &ParallelConfig,
) -> Result<RunStats>
where
    S: Source + ?Sized,
    T: Transform<Input = S::Output> + ?Sized,
    K: Sink<Input = T::Output> + ?Sized,
{
    ParallelRunner::new(config.clone()).run(source, sink, transform)
}
