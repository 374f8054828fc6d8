//! Fold and reduce.
//!
//! Sequential folds work with any combiner. The parallel fold only exists in
//! a form that takes a `merge` function for two partial accumulators: by
//! passing one the caller asserts that combining is associative and that
//! `initial` is an identity for `merge`. The source is cut into contiguous
//! chunks, each chunk is folded on a worker starting from a clone of
//! `initial`, and the partial results are merged pairwise in a balanced
//! tree as they arrive, so only a logarithmic number of partials is alive at
//! once. Merges always join a left neighbour with its right neighbour, so
//! commutativity is not required.
//!
//! # Example
//!
//! ```rust
//! use pipefold::reduce::{FoldConfig, fold, fold_parallel};
//! use pipefold::sources::range;
//!
//! let sum = fold(&mut range(1u64..5), 0, |acc, x| Ok(acc + x)).unwrap();
//! assert_eq!(sum, 10);
//!
//! let config = FoldConfig::new(4).with_chunk_size(100);
//! let sum = fold_parallel(
//!     &mut range(1u64..10_001),
//!     0,
//!     |acc, x| Ok(acc + x),
//!     |a, b| Ok(a + b),
//!     &config,
//! )
//! .unwrap();
//! assert_eq!(sum, 50_005_000);
//! ```

use std::time::Duration;

use crate::element::{Sink, Source, Transform};
use crate::error::{Error, Result, Stage, StageResult};
use crate::observability::{RunMetrics, TracingConfig};
use crate::operators::Passthrough;
use crate::runner::{CancelToken, ParallelConfig, ParallelRunner, RunStats, default_workers, finish};
use crate::sources::Chunks;

/// Default number of elements per chunk for parallel folds.
const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Configuration for parallel folds.
#[derive(Debug, Clone)]
pub struct FoldConfig {
    /// Name used for spans, logs and metric labels.
    pub name: String,
    /// Number of worker threads. Must be at least 1.
    pub workers: usize,
    /// Elements per chunk. Must be at least 1.
    pub chunk_size: usize,
    /// Cancel the fold once this much time has passed since it started.
    pub timeout: Option<Duration>,
    /// External cancellation signal.
    pub cancel: Option<CancelToken>,
    /// Span and event settings.
    pub tracing: TracingConfig,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            name: "fold".to_string(),
            workers: default_workers(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: None,
            cancel: None,
            tracing: TracingConfig::default(),
        }
    }
}

impl FoldConfig {
    /// Create a config with the given number of workers.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Set the number of elements per chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Cancel the fold after `timeout`.
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

    /// Check the config before a fold.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        self.to_parallel().validate()
    }

    /// Runner settings for the chunk-folding stage. Chunks are delivered in
    /// order so that merges only ever join neighbours.
    fn to_parallel(&self) -> ParallelConfig {
        ParallelConfig {
            name: self.name.clone(),
            workers: self.workers,
            preserve_order: true,
            max_in_flight: Some(self.workers.saturating_mul(2)),
            channel_capacity: self.workers.max(1),
            timeout: self.timeout,
            cancel: self.cancel.clone(),
            tracing: self.tracing.clone(),
        }
    }
}

/// Left-fold every element of `source` into `initial`.
///
/// A combiner failure ends the fold; the partial accumulator is dropped.
pub fn fold<S, Acc, F>(source: &mut S, initial: Acc, combine: F) -> Result<Acc>
where
    S: Source + ?Sized,
    F: FnMut(Acc, S::Output) -> StageResult<Acc>,
{
    fold_with(source, &Passthrough::new(), initial, combine)
}

/// Left-fold the output of `transform` applied to every element of `source`.
pub fn fold_with<S, T, Acc, F>(
    source: &mut S,
    transform: &T,
    initial: Acc,
    mut combine: F,
) -> Result<Acc>
where
    S: Source + ?Sized,
    T: Transform<Input = S::Output> + ?Sized,
    F: FnMut(Acc, T::Output) -> StageResult<Acc>,
{
    let _span = TracingConfig::default().enter_run("fold", "fold");
    let metrics = RunMetrics::new("fold");
    let mut stats = RunStats::default();

    let mut acc = initial;
    let result = loop {
        let item = match source.produce() {
            Ok(Some(item)) => item,
            Ok(None) => break Ok(acc),
            Err(e) => break Err(Error::Source(e)),
        };
        stats.pulled += 1;
        metrics.record_pulled();

        let value = match transform.apply(item) {
            Ok(Some(value)) => value,
            Ok(None) => {
                stats.filtered += 1;
                metrics.record_filtered();
                continue;
            }
            Err(e) => break Err(e.in_transform()),
        };
        acc = match combine(acc, value) {
            Ok(next) => next,
            Err(e) => break Err(Error::transform(Stage::Combine, e)),
        };
        stats.emitted += 1;
        metrics.record_emitted();
    };
    finish("fold", &metrics, &stats, result)
}

/// Fold seeded with the first element. Returns `Ok(None)` for an empty source.
pub fn reduce<S, F>(source: &mut S, mut combine: F) -> Result<Option<S::Output>>
where
    S: Source + ?Sized,
    F: FnMut(S::Output, S::Output) -> StageResult<S::Output>,
{
    fold(source, None, |acc, item| match acc {
        None => Ok(Some(item)),
        Some(acc) => combine(acc, item).map(Some),
    })
}

/// Fold `source` in parallel chunks and merge the partial results.
///
/// `combine` must be associative, `merge` must join two partial accumulators
/// consistently with `combine`, and `initial` must be an identity for
/// `merge`. Under those conditions the result equals [`fold`] for every
/// chunk size and worker count.
pub fn fold_parallel<S, Acc, F, M>(
    source: &mut S,
    initial: Acc,
    combine: F,
    merge: M,
    config: &FoldConfig,
) -> Result<Acc>
where
    S: Source + ?Sized,
    Acc: Clone + Send + Sync + 'static,
    F: Fn(Acc, S::Output) -> StageResult<Acc> + Send + Sync,
    M: Fn(Acc, Acc) -> StageResult<Acc> + Send,
{
    fold_parallel_with(source, &Passthrough::new(), initial, combine, merge, config)
}

/// Parallel fold over the output of `transform`.
pub fn fold_parallel_with<S, T, Acc, F, M>(
    source: &mut S,
    transform: &T,
    initial: Acc,
    combine: F,
    merge: M,
    config: &FoldConfig,
) -> Result<Acc>
where
    S: Source + ?Sized,
    T: Transform<Input = S::Output> + ?Sized,
    Acc: Clone + Send + Sync + 'static,
    F: Fn(Acc, T::Output) -> StageResult<Acc> + Send + Sync,
    M: Fn(Acc, Acc) -> StageResult<Acc> + Send,
{
    config.validate()?;
    let _span = config.tracing.enter_run(&config.name, "fold_parallel");

    // A merge failure stops the chunk folds through this token without
    // cancelling the caller's.
    let halt = match &config.cancel {
        Some(token) => token.child_token(),
        None => CancelToken::new(),
    };
    let mut parallel = config.to_parallel();
    parallel.cancel = Some(halt.clone());

    let folder = ChunkFold {
        transform,
        initial: initial.clone(),
        combine,
    };
    let mut chunks = Chunks::new(source, config.chunk_size);
    let mut stack = MergeStack::new(merge, halt);
    let outcome = ParallelRunner::new(parallel).run(&mut chunks, &mut stack, &folder);

    tracing::debug!(
        name = %config.name,
        partials = stack.merged,
        pending = stack.levels.len(),
        "merging partial accumulators"
    );

    match stack.into_merged() {
        Err(e) => {
            let stats = outcome.as_ref().copied().unwrap_or_default();
            finish(&config.name, &RunMetrics::new(&config.name), &stats, Err(e))
        }
        Ok(acc) => {
            outcome?;
            Ok(acc.unwrap_or(initial))
        }
    }
}

/// Folds one chunk into a partial accumulator.
struct ChunkFold<'t, T: ?Sized, Acc, F> {
    transform: &'t T,
    initial: Acc,
    combine: F,
}

impl<T, Acc, F> Transform for ChunkFold<'_, T, Acc, F>
where
    T: Transform + ?Sized,
    Acc: Clone + Send + Sync + 'static,
    F: Fn(Acc, T::Output) -> StageResult<Acc> + Send + Sync,
{
    type Input = Vec<T::Input>;
    type Output = Acc;

    fn apply(&self, chunk: Vec<T::Input>) -> Result<Option<Acc>> {
        let mut acc = self.initial.clone();
        for item in chunk {
            if let Some(value) = self.transform.apply(item).map_err(Error::in_transform)? {
                acc = (self.combine)(acc, value).map_err(|e| Error::transform(Stage::Combine, e))?;
            }
        }
        Ok(Some(acc))
    }

    fn name(&self) -> &str {
        "chunk_fold"
    }
}

/// Merges partial accumulators as they arrive, in source order.
///
/// Works like a binary counter: each entry holds the merge of `2^level`
/// consecutive partials, and two entries of the same level are joined as
/// soon as both exist. At most one entry per level is kept.
struct MergeStack<Acc, M> {
    levels: Vec<(u32, Acc)>,
    merge: M,
    merged: usize,
    failed: Option<Error>,
    halt: CancelToken,
}

impl<Acc, M> MergeStack<Acc, M>
where
    M: Fn(Acc, Acc) -> StageResult<Acc>,
{
    fn new(merge: M, halt: CancelToken) -> Self {
        Self {
            levels: Vec::new(),
            merge,
            merged: 0,
            failed: None,
            halt,
        }
    }

    fn join(&self, left: Acc, right: Acc) -> Result<Acc> {
        (self.merge)(left, right).map_err(|e| Error::transform(Stage::Merge, e))
    }

    fn push(&mut self, mut acc: Acc) -> Result<()> {
        let mut level = 0;
        while self.levels.last().is_some_and(|(top, _)| *top == level) {
            if let Some((_, left)) = self.levels.pop() {
                acc = self.join(left, acc)?;
            }
            level += 1;
        }
        self.levels.push((level, acc));
        Ok(())
    }

    /// Fold the remaining levels right to left. `Ok(None)` if nothing was pushed.
    fn into_merged(mut self) -> Result<Option<Acc>> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        let Some((_, mut acc)) = self.levels.pop() else {
            return Ok(None);
        };
        while let Some((_, left)) = self.levels.pop() {
            acc = self.join(left, acc)?;
        }
        Ok(Some(acc))
    }
}

impl<Acc, M> Sink for MergeStack<Acc, M>
where
    Acc: Send + 'static,
    M: Fn(Acc, Acc) -> StageResult<Acc> + Send,
{
    type Input = Acc;

    fn consume(&mut self, acc: Acc) {
        if self.failed.is_some() {
            return;
        }
        self.merged += 1;
        if let Err(e) = self.push(acc) {
            self.levels.clear();
            self.failed = Some(e);
            self.halt.cancel();
        }
    }

    fn name(&self) -> &str {
        "merge_stack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::filter;
    use crate::sources::{from_fn, from_iter, range, try_from_iter};

    #[test]
    fn test_fold_sum() {
        let sum = fold(&mut from_iter(vec![1, 2, 3, 4]), 0, |acc, x| Ok(acc + x)).unwrap();
        assert_eq!(sum, 10);
    }

    #[test]
    fn test_fold_empty_returns_initial() {
        let out = fold(&mut from_iter(Vec::<u32>::new()), 7u32, |acc, x| Ok(acc + x)).unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn test_fold_is_left_fold() {
        let text = fold(&mut from_iter(["a", "b", "c"]), String::new(), |mut acc, s| {
            acc.push_str(s);
            Ok(acc)
        })
        .unwrap();
        assert_eq!(text, "abc");
    }

    #[test]
    fn test_fold_combine_error() {
        let mut calls = 0;
        let mut source = from_fn(|| -> StageResult<Option<i32>> {
            calls += 1;
            Ok(Some(calls))
        });
        let err = fold(&mut source, 0, |acc, x| {
            if x == 3 {
                Err("overflow".into())
            } else {
                Ok(acc + x)
            }
        })
        .unwrap_err();
        drop(source);
        assert_eq!(err.stage(), Some(Stage::Combine));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_fold_source_error() {
        let err = fold(
            &mut try_from_iter(vec![Ok(1), Err("truncated")]),
            0,
            |acc, x| Ok(acc + x),
        )
        .unwrap_err();
        assert!(err.is_source());
    }

    #[test]
    fn test_fold_with_filter() {
        let evens = fold_with(
            &mut range(0u32..10),
            &filter(|x: &u32| x % 2 == 0),
            Vec::new(),
            |mut acc, x| {
                acc.push(x);
                Ok(acc)
            },
        )
        .unwrap();
        assert_eq!(evens, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_reduce() {
        let max = reduce(&mut from_iter(vec![3, 9, 2]), |a, b| Ok(a.max(b))).unwrap();
        assert_eq!(max, Some(9));

        let none = reduce(&mut from_iter(Vec::<i32>::new()), |a, b| Ok(a + b)).unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_merge_stack_keeps_order() {
        let mut stack = MergeStack::new(|a: String, b: String| Ok(a + &b), CancelToken::new());
        for part in ["a", "b", "c", "d", "e", "f", "g"] {
            stack.consume(part.to_string());
        }
        // 7 = 0b111: one entry each at levels 2, 1 and 0.
        let levels: Vec<u32> = stack.levels.iter().map(|(level, _)| *level).collect();
        assert_eq!(levels, vec![2, 1, 0]);
        assert_eq!(stack.into_merged().unwrap().unwrap(), "abcdefg");

        let empty = MergeStack::new(|a: u8, b: u8| Ok(a + b), CancelToken::new());
        assert_eq!(empty.into_merged().unwrap(), None);
    }

    #[test]
    fn test_merge_stack_failure_halts() {
        let halt = CancelToken::new();
        let mut stack = MergeStack::new(
            |a: u32, b: u32| if b == 3 { Err("too big".into()) } else { Ok(a + b) },
            halt.clone(),
        );
        for part in 0..8 {
            stack.consume(part);
        }
        assert!(halt.is_cancelled());
        assert!(stack.levels.is_empty());
        assert_eq!(stack.merged, 4);
        assert_eq!(stack.into_merged().unwrap_err().stage(), Some(Stage::Merge));
    }

    #[test]
    fn test_fold_parallel_with_huge_timeout() {
        let config = FoldConfig::new(2)
            .with_chunk_size(8)
            .with_timeout(Duration::MAX);
        let sum = fold_parallel(&mut range(0u32..100), 0, |a, x| Ok(a + x), |a, b| Ok(a + b), &config)
            .unwrap();
        assert_eq!(sum, 4950);
    }

    #[test]
    fn test_fold_parallel_merge_error_leaves_caller_token() {
        let token = CancelToken::new();
        let config = FoldConfig::new(2).with_chunk_size(2).with_cancel(token.clone());
        let err = fold_parallel(
            &mut range(0u32..100),
            0u32,
            |a, x| Ok(a + x),
            |_, _| Err("merge refused".into()),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Merge));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_fold_parallel_matches_sequential_for_all_chunk_sizes() {
        let data: Vec<u64> = (1..=257).collect();
        let expected = fold(&mut from_iter(data.clone()), 0u64, |a, x| Ok(a + x * x)).unwrap();
        for chunk_size in [1, 2, 3, 7, 64, 256, 257, 1000] {
            let config = FoldConfig::new(3).with_chunk_size(chunk_size);
            let got = fold_parallel(
                &mut from_iter(data.clone()),
                0u64,
                |a, x| Ok(a + x * x),
                |a, b| Ok(a + b),
                &config,
            )
            .unwrap();
            assert_eq!(got, expected, "chunk_size {chunk_size}");
        }
    }

    #[test]
    fn test_fold_parallel_non_commutative_merge() {
        // String concatenation is associative but not commutative.
        let config = FoldConfig::new(4).with_chunk_size(3);
        let letters: Vec<char> = ('a'..='z').collect();
        let joined = fold_parallel(
            &mut from_iter(letters),
            String::new(),
            |mut acc, c| {
                acc.push(c);
                Ok(acc)
            },
            |a, b| Ok(a + &b),
            &config,
        )
        .unwrap();
        assert_eq!(joined, "abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn test_fold_parallel_merge_error() {
        let config = FoldConfig::new(2).with_chunk_size(2);
        let err = fold_parallel(
            &mut range(0u32..10),
            0u32,
            |a, x| Ok(a + x),
            |_, _| Err("merge refused".into()),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Merge));
    }

    #[test]
    fn test_fold_parallel_rejects_zero_chunk() {
        let config = FoldConfig::new(2).with_chunk_size(0);
        let err = fold_parallel(&mut range(0u32..10), 0, |a, x| Ok(a + x), |a, b| Ok(a + b), &config)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
