//! Typed pipeline builder.
//!
//! Chains a source, any number of transforms and a sink (or a fold) with
//! the element types checked at compile time. The composed transform chain
//! is itself a [`Transform`], so the same pipeline can be driven by either
//! runner.
//!
//! ```rust
//! use pipefold::operators::{filter, map};
//! use pipefold::pipeline::pipeline;
//! use pipefold::sinks::collect;
//! use pipefold::sources::from_iter;
//!
//! let sink = pipeline(from_iter(vec![1u32, 2, 3, 4, 5, 6]))
//!     .then(filter(|x: &u32| *x % 2 == 0))
//!     .then(map(|x: u32| x * 10))
//!     .sink(collect())
//!     .run()
//!     .unwrap();
//! assert_eq!(sink.into_inner(), vec![20, 40, 60]);
//! ```

use crate::element::{Sink, Source, Transform};
use crate::error::{Error, Result, StageResult};
use crate::operators::Passthrough;
use crate::reduce::{self, FoldConfig};
use crate::runner::{ParallelConfig, ParallelRunner, RunStats, SequentialRunner};

// ============================================================================
// Transform chains
// ============================================================================

/// End of a transform chain. Passes its input through.
pub struct Identity;

/// A chain of transforms applied in order (first added = first applied).
///
/// `Chain<A, Chain<B, Identity>>` runs `A` and feeds its output to `B`. A
/// link that drops the element ends the walk; a link that fails ends it with
/// that link's error.
pub struct Chain<T, Tail>
where
    T: Transform,
{
    transform: T,
    tail: Tail,
}

impl<T, Tail> Chain<T, Tail>
where
    T: Transform,
{
    /// Put `transform` in front of `tail`.
    pub fn new(transform: T, tail: Tail) -> Self {
        Self { transform, tail }
    }
}

/// Type-level push onto the end of a chain.
pub trait AppendTransform<T: Transform>: Sized {
    /// Chain type with `T` as its last link.
    type Appended;

    /// Add `transform` after the last link.
    fn append(self, transform: T) -> Self::Appended;
}

impl<T: Transform> AppendTransform<T> for Identity {
    type Appended = Chain<T, Identity>;

    fn append(self, transform: T) -> Self::Appended {
        Chain::new(transform, Identity)
    }
}

impl<Head, Tail, T> AppendTransform<T> for Chain<Head, Tail>
where
    Head: Transform,
    Tail: AppendTransform<T>,
    T: Transform,
{
    type Appended = Chain<Head, Tail::Appended>;

    fn append(self, transform: T) -> Self::Appended {
        Chain {
            transform: self.transform,
            tail: self.tail.append(transform),
        }
    }
}

/// A chain that can be walked from one input to at most one output.
pub trait TransformChain<In>: Send + Sync {
    /// Output of the last link.
    type Output: Send + 'static;

    /// Feed `input` through every link in order.
    fn apply_chain(&self, input: In) -> Result<Option<Self::Output>>;
}

impl<In: Send + 'static> TransformChain<In> for Identity {
    type Output = In;

    fn apply_chain(&self, input: In) -> Result<Option<In>> {
        Ok(Some(input))
    }
}

impl<T, Tail> TransformChain<T::Input> for Chain<T, Tail>
where
    T: Transform,
    Tail: TransformChain<T::Output>,
{
    type Output = Tail::Output;

    fn apply_chain(&self, input: T::Input) -> Result<Option<Self::Output>> {
        match self.transform.apply(input)? {
            Some(output) => self.tail.apply_chain(output),
            None => Ok(None),
        }
    }
}

impl<T, Tail> Transform for Chain<T, Tail>
where
    T: Transform,
    Tail: TransformChain<T::Output>,
{
    type Input = T::Input;
    type Output = Tail::Output;

    fn apply(&self, input: T::Input) -> Result<Option<Self::Output>> {
        TransformChain::apply_chain(self, input)
    }

    fn name(&self) -> &str {
        "chain"
    }
}

// ============================================================================
// Builder states
// ============================================================================

/// Builder state: a source and no transforms yet.
pub struct PipelineWithSource<S: Source> {
    source: S,
}

impl<S: Source> PipelineWithSource<S> {
    /// Start building from `source`.
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Append the first transform.
    pub fn then<T>(self, transform: T) -> PipelineWithTransforms<S, Chain<T, Identity>>
    where
        T: Transform<Input = S::Output>,
    {
        PipelineWithTransforms {
            source: self.source,
            chain: Chain::new(transform, Identity),
        }
    }

    /// Send source elements straight to `sink`.
    pub fn sink<K>(self, sink: K) -> RunnablePipeline<S, Passthrough<S::Output>, K>
    where
        K: Sink<Input = S::Output>,
    {
        RunnablePipeline::new(self.source, Passthrough::new(), sink)
    }

    /// Left-fold the source.
    pub fn fold<Acc, F>(mut self, initial: Acc, combine: F) -> Result<Acc>
    where
        F: FnMut(Acc, S::Output) -> StageResult<Acc>,
    {
        reduce::fold(&mut self.source, initial, combine)
    }
}

/// Builder state: a source followed by a chain `C` of one or more transforms.
pub struct PipelineWithTransforms<S, C>
where
    S: Source,
{
    source: S,
    chain: C,
}

impl<S, C> PipelineWithTransforms<S, C>
where
    S: Source,
    C: Transform<Input = S::Output>,
{
    /// Append a transform whose input is the chain's current output.
    pub fn then<T>(self, transform: T) -> PipelineWithTransforms<S, C::Appended>
    where
        T: Transform<Input = C::Output>,
        C: AppendTransform<T>,
    {
        PipelineWithTransforms {
            source: self.source,
            chain: self.chain.append(transform),
        }
    }

    /// Finish the builder with `sink`.
    pub fn sink<K>(self, sink: K) -> RunnablePipeline<S, C, K>
    where
        K: Sink<Input = C::Output>,
    {
        RunnablePipeline::new(self.source, self.chain, sink)
    }

    /// Left-fold the transformed elements.
    pub fn fold<Acc, F>(mut self, initial: Acc, combine: F) -> Result<Acc>
    where
        F: FnMut(Acc, C::Output) -> StageResult<Acc>,
    {
        reduce::fold_with(&mut self.source, &self.chain, initial, combine)
    }

    /// Fold the transformed elements in parallel chunks.
    ///
    /// See [`reduce::fold_parallel`] for the requirements on `combine`,
    /// `merge` and `initial`.
    pub fn fold_parallel<Acc, F, M>(
        mut self,
        initial: Acc,
        combine: F,
        merge: M,
        config: &FoldConfig,
    ) -> Result<Acc>
    where
        Acc: Clone + Send + Sync + 'static,
        F: Fn(Acc, C::Output) -> StageResult<Acc> + Send + Sync,
        M: Fn(Acc, Acc) -> StageResult<Acc> + Send,
    {
        reduce::fold_parallel_with(&mut self.source, &self.chain, initial, combine, merge, config)
    }
}

/// Source, transform chain and sink, ready to run.
///
/// The pipeline owns its source and sink; running it returns the sink so
/// that collected results can be read back.
pub struct RunnablePipeline<S, C, K>
where
    S: Source,
    K: Sink,
{
    name: String,
    source: S,
    chain: C,
    sink: K,
}

impl<S, C, K> RunnablePipeline<S, C, K>
where
    S: Source,
    C: Transform<Input = S::Output, Output = K::Input>,
    K: Sink,
{
    fn new(source: S, chain: C, sink: K) -> Self {
        Self {
            name: "pipeline".to_string(),
            source,
            chain,
            sink,
        }
    }

    /// Set the name used in spans and metrics for sequential runs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Run the pipeline to completion on the calling thread.
    pub fn run(self) -> Result<K> {
        self.run_with_stats().map(|(sink, _)| sink)
    }

    /// Run to completion and also return the run counters.
    pub fn run_with_stats(mut self) -> Result<(K, RunStats)> {
        let stats = SequentialRunner::new().with_name(self.name).run(
            &mut self.source,
            &mut self.sink,
            &self.chain,
        )?;
        Ok((self.sink, stats))
    }

    /// Run the pipeline on a worker pool.
    pub fn run_parallel(mut self, config: &ParallelConfig) -> Result<K> {
        ParallelRunner::new(config.clone()).run(&mut self.source, &mut self.sink, &self.chain)?;
        Ok(self.sink)
    }

    /// [`run`](Self::run) on tokio's blocking pool.
    pub async fn run_async(self) -> Result<K>
    where
        S: 'static,
        C: 'static,
        K: 'static,
    {
        tokio::task::spawn_blocking(|| self.run())
            .await
            .map_err(|e| Error::Join(e.to_string()))?
    }

    /// [`run_parallel`](Self::run_parallel) on tokio's blocking pool.
    pub async fn run_parallel_async(self, config: ParallelConfig) -> Result<K>
    where
        S: 'static,
        C: 'static,
        K: 'static,
    {
        tokio::task::spawn_blocking(move || self.run_parallel(&config))
            .await
            .map_err(|e| Error::Join(e.to_string()))?
    }
}

// ============================================================================
// `>>` composition
// ============================================================================

/// `pipeline(src) >> t`
impl<S, T> std::ops::Shr<T> for PipelineWithSource<S>
where
    S: Source,
    T: Transform<Input = S::Output>,
{
    type Output = PipelineWithTransforms<S, Chain<T, Identity>>;

    fn shr(self, transform: T) -> Self::Output {
        self.then(transform)
    }
}

/// `... >> t >> u`
impl<S, C, T> std::ops::Shr<T> for PipelineWithTransforms<S, C>
where
    S: Source,
    C: Transform<Input = S::Output> + AppendTransform<T>,
    T: Transform<Input = C::Output>,
{
    type Output = PipelineWithTransforms<S, C::Appended>;

    fn shr(self, transform: T) -> Self::Output {
        self.then(transform)
    }
}

/// Start a typed pipeline at `source`.
pub fn pipeline<S: Source>(source: S) -> PipelineWithSource<S> {
    PipelineWithSource::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::operators::*;
    use crate::sinks::collect;
    use crate::sources::{from_iter, range, try_from_iter};

    #[test]
    fn test_source_straight_to_sink() {
        let sink = pipeline(from_iter(vec!['p', 'f'])).sink(collect()).run().unwrap();
        assert_eq!(sink.into_inner(), vec!['p', 'f']);
    }

    #[test]
    fn test_chain_parses_then_filters() {
        let (sink, stats) = pipeline(from_iter(vec!["3", "40", "5", "60"]))
            .then(try_map(|s: &str| Ok(s.parse::<u16>()?)))
            .then(filter(|n: &u16| *n >= 10))
            .then(map(|n: u16| n / 10))
            .sink(collect())
            .run_with_stats()
            .unwrap();

        assert_eq!(sink.into_inner(), vec![4, 6]);
        assert_eq!(stats.pulled, 4);
        assert_eq!(stats.filtered, 2);
        assert_eq!(stats.emitted, 2);
    }

    #[test]
    fn test_dropped_element_skips_later_links() {
        let after = std::sync::atomic::AtomicUsize::new(0);
        let sink = pipeline(range(0u8..10))
            .then(filter(|x: &u8| *x < 3))
            .then(inspect(|_: &u8| {
                after.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }))
            .sink(collect())
            .run()
            .unwrap();

        assert_eq!(sink.into_inner(), vec![0, 1, 2]);
        assert_eq!(after.load(std::sync::atomic::Ordering::Relaxed), 3);
    }

    #[test]
    fn test_chain_error_keeps_stage() {
        let err = pipeline(from_iter(vec!["4", "x"]))
            .then(try_map(|s: &str| Ok(s.parse::<u32>()?)))
            .then(filter(|x: &u32| *x > 1))
            .sink(collect())
            .run()
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Map));
    }

    #[test]
    fn test_source_error_through_builder() {
        let err = pipeline(try_from_iter(vec![Ok(1i32), Err("eof in header")]))
            .then(map(|x: i32| -x))
            .sink(collect())
            .run()
            .unwrap_err();
        assert!(err.is_source());
    }

    #[test]
    fn test_shr_matches_then() {
        let composed = (pipeline(range(1i64..8)) >> map(|x: i64| x * x) >> filter(|x: &i64| x % 2 == 1))
            .sink(collect())
            .run()
            .unwrap();
        assert_eq!(composed.into_inner(), vec![1, 9, 25, 49]);
    }

    #[test]
    fn test_pipeline_fold() {
        let total = pipeline(range(1u64..101))
            .then(filter(|x: &u64| x % 2 == 1))
            .fold(0u64, |acc, x| Ok(acc + x))
            .unwrap();
        assert_eq!(total, 2500);
    }

    #[test]
    fn test_source_only_fold() {
        let longest = pipeline(from_iter(vec!["ab", "abcd", "a"]))
            .fold(0usize, |acc, s| Ok(acc.max(s.len())))
            .unwrap();
        assert_eq!(longest, 4);
    }

    #[test]
    fn test_pipeline_fold_parallel() {
        let config = FoldConfig::new(3).with_chunk_size(16);
        let total = pipeline(range(0u64..1000))
            .then(map(|x: u64| x * 3))
            .fold_parallel(0u64, |acc, x| Ok(acc + x), |a, b| Ok(a + b), &config)
            .unwrap();
        assert_eq!(total, 3 * 499_500);
    }

    #[test]
    fn test_pipeline_run_parallel() {
        let sink = pipeline(range(0u32..200))
            .then(map(|x: u32| x + 1))
            .sink(collect())
            .run_parallel(&ParallelConfig::new(4))
            .unwrap();
        assert_eq!(sink.into_inner(), (1..=200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_run_async() {
        let sink = pipeline(from_iter(vec![1u8, 2, 3]))
            .then(map(|x: u8| x * 2))
            .sink(collect())
            .run_async()
            .await
            .unwrap();
        assert_eq!(sink.into_inner(), vec![2, 4, 6]);
    }
}
