//! In-memory sinks.
//!
//! A typed pipeline hands its sink back when the run succeeds, so these are
//! also how results get out of a [`RunnablePipeline`](crate::pipeline::RunnablePipeline).

use std::marker::PhantomData;

use crate::element::Sink;

/// Appends every element to a `Vec`, in delivery order.
#[derive(Debug)]
pub struct CollectSink<T> {
    items: Vec<T>,
}

impl<T> CollectSink<T> {
    /// Empty sink.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Take the elements received so far.
    pub fn into_inner(self) -> Vec<T> {
        self.items
    }

    /// Borrow the elements received so far.
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Sink for CollectSink<T> {
    type Input = T;

    fn consume(&mut self, item: T) {
        self.items.push(item);
    }

    fn name(&self) -> &str {
        "collect"
    }
}

/// Shorthand for [`CollectSink::new`].
pub fn collect<T: Send + 'static>() -> CollectSink<T> {
    CollectSink::new()
}

/// Drops every element and keeps a count.
#[derive(Debug)]
pub struct DiscardSink<T> {
    count: u64,
    _t: PhantomData<fn(T)>,
}

impl<T> DiscardSink<T> {
    /// Sink with a zero count.
    pub fn new() -> Self {
        Self {
            count: 0,
            _t: PhantomData,
        }
    }

    /// Number of items discarded so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<T> Default for DiscardSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Sink for DiscardSink<T> {
    type Input = T;

    fn consume(&mut self, _item: T) {
        self.count += 1;
    }

    fn name(&self) -> &str {
        "discard"
    }
}

/// Shorthand for [`DiscardSink::new`].
pub fn discard<T: Send + 'static>() -> DiscardSink<T> {
    DiscardSink::new()
}

/// Hands every element to a closure.
pub struct ForEachSink<F, T> {
    f: F,
    _t: PhantomData<fn(T)>,
}

impl<F, T> ForEachSink<F, T> {
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<F, T> Sink for ForEachSink<F, T>
where
    F: FnMut(T) + Send,
    T: Send + 'static,
{
    type Input = T;

    fn consume(&mut self, item: T) {
        (self.f)(item);
    }

    fn name(&self) -> &str {
        "for_each"
    }
}

/// Shorthand for [`ForEachSink::new`].
pub fn for_each<F, T>(f: F) -> ForEachSink<F, T>
where
    F: FnMut(T) + Send,
    T: Send + 'static,
{
    ForEachSink::new(f)
}
