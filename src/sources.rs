//! In-memory sources.
//!
//! Concrete data sources (files, sockets, queues) live outside this crate and
//! only need to implement [`Source`]. The adapters here cover iterators and
//! closures, which is what tests and small programs reach for.

use std::marker::PhantomData;

use crate::element::Source;
use crate::error::{BoxError, StageResult};

/// A source that produces items from an iterator.
pub struct IterSource<I: Iterator> {
    iter: I,
}

impl<I: Iterator> IterSource<I> {
    /// Create a new iterator source.
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I> Source for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    type Output = I::Item;

    fn produce(&mut self) -> StageResult<Option<I::Item>> {
        Ok(self.iter.next())
    }

    fn name(&self) -> &str {
        "iter_source"
    }
}

/// Create a source from an iterator.
pub fn from_iter<I>(iter: I) -> IterSource<I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: Send,
    I::Item: Send + 'static,
{
    IterSource::new(iter.into_iter())
}

/// A source that produces a range of numbers.
pub fn range<T>(range: std::ops::Range<T>) -> IterSource<std::ops::Range<T>>
where
    std::ops::Range<T>: Iterator + Send,
    T: Send + 'static,
{
    IterSource::new(range)
}

/// A source over an iterator of results.
///
/// The first `Err` is reported as a source failure. Nothing is pulled from
/// the iterator after a failure or after it runs dry.
pub struct TryIterSource<I> {
    iter: I,
    done: bool,
}

impl<I, T, E> Source for TryIterSource<I>
where
    I: Iterator<Item = Result<T, E>> + Send,
    T: Send + 'static,
    E: Into<BoxError>,
{
    type Output = T;

    fn produce(&mut self) -> StageResult<Option<T>> {
        if self.done {
            return Ok(None);
        }
        match self.iter.next() {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(e)) => {
                self.done = true;
                Err(e.into())
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn name(&self) -> &str {
        "try_iter_source"
    }
}

/// Create a source from an iterator of results.
pub fn try_from_iter<I, T, E>(iter: I) -> TryIterSource<I::IntoIter>
where
    I: IntoIterator<Item = Result<T, E>>,
    I::IntoIter: Send,
    T: Send + 'static,
    E: Into<BoxError>,
{
    TryIterSource {
        iter: iter.into_iter(),
        done: false,
    }
}

/// A source that produces a single item.
pub struct OnceSource<T> {
    item: Option<T>,
}

impl<T: Send + 'static> Source for OnceSource<T> {
    type Output = T;

    fn produce(&mut self) -> StageResult<Option<T>> {
        Ok(self.item.take())
    }

    fn name(&self) -> &str {
        "once"
    }
}

/// Create a source that produces a single item.
pub fn once<T: Send + 'static>(item: T) -> OnceSource<T> {
    OnceSource { item: Some(item) }
}

/// A source backed by a closure with the full produce contract.
pub struct FnSource<F, T> {
    f: F,
    _t: PhantomData<fn() -> T>,
}

impl<F, T> Source for FnSource<F, T>
where
    F: FnMut() -> StageResult<Option<T>> + Send,
    T: Send + 'static,
{
    type Output = T;

    fn produce(&mut self) -> StageResult<Option<T>> {
        (self.f)()
    }

    fn name(&self) -> &str {
        "from_fn"
    }
}

/// Create a source that calls `f` for every pull.
///
/// `f` returns `Ok(None)` when exhausted and `Err` on failure.
pub fn from_fn<F, T>(f: F) -> FnSource<F, T>
where
    F: FnMut() -> StageResult<Option<T>> + Send,
    T: Send + 'static,
{
    FnSource { f, _t: PhantomData }
}

/// Create a source that produces items by repeatedly calling an infallible function.
pub fn repeat_with<F, T>(mut f: F) -> FnSource<impl FnMut() -> StageResult<Option<T>> + Send, T>
where
    F: FnMut() -> Option<T> + Send,
    T: Send + 'static,
{
    from_fn(move || Ok(f()))
}

/// A source that groups elements of an inner source into contiguous chunks.
///
/// The final chunk may be shorter. The inner source is never pulled after it
/// reports exhaustion or failure.
pub struct Chunks<S: Source> {
    inner: S,
    size: usize,
    exhausted: bool,
}

impl<S: Source> Chunks<S> {
    /// Group `inner` into chunks of `size` elements. `size` must be at least 1.
    pub fn new(inner: S, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
            exhausted: false,
        }
    }

    /// Recover the inner source.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Source> Source for Chunks<S> {
    type Output = Vec<S::Output>;

    fn produce(&mut self) -> StageResult<Option<Vec<S::Output>>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut chunk = Vec::with_capacity(self.size);
        while chunk.len() < self.size {
            match self.inner.produce() {
                Ok(Some(item)) => chunk.push(item),
                Ok(None) => {
                    self.exhausted = true;
                    break;
                }
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                }
            }
        }
        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }

    fn name(&self) -> &str {
        "chunks"
    }
}
