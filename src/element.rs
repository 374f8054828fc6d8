//! Producer, consumer and transform capabilities.
//!
//! These three traits are the whole contract between the runners and the
//! outside world. Anything that can hand out elements one at a time is a
//! [`Source`], anything that can accept them is a [`Sink`], and the work in
//! between is a [`Transform`].

use crate::error::{Result, StageResult};

/// A source that produces values on demand.
///
/// Sources are pulled: the runner calls [`produce`](Source::produce) until it
/// observes a terminal signal, and never again after that.
///
/// - `Ok(Some(item))` yields the next element.
/// - `Ok(None)` signals exhaustion. It is not an error.
/// - `Err(e)` is a producer failure. The runner stops and reports it as
///   [`Error::Source`](crate::Error::Source); it is never retried.
///
/// Sources are not assumed to be thread-safe. The parallel runner serializes
/// every call to `produce` behind a single lock.
pub trait Source: Send {
    /// The type of data this source produces.
    type Output: Send + 'static;

    /// Produce the next item.
    fn produce(&mut self) -> StageResult<Option<Self::Output>>;

    /// Get the name of this source.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A sink that consumes values one at a time.
///
/// Sinks have no error channel. A sink that can fail has to report it
/// through its own side channel.
///
/// Runners only ever call a sink from the thread that started the run, so a
/// sink does not need to be `Sync`.
pub trait Sink: Send {
    /// The type of data this sink consumes.
    type Input: Send + 'static;

    /// Consume an item.
    fn consume(&mut self, item: Self::Input);

    /// Get the name of this sink.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A transform that converts `Input` into zero or one `Output`.
///
/// Map is the arity-1 case, Filter the arity 0-or-1 case. Transforms take
/// `&self` because the parallel runner shares one instance across all of its
/// workers.
///
/// Failures are returned as [`Error::Transform`](crate::Error::Transform)
/// tagged with the stage that failed; the operators in
/// [`operators`](crate::operators) do this for closures. Runners treat any
/// other variant coming out of `apply` as a `Map` failure wrapping it, so a
/// transform cannot report a source failure or a cancellation.
pub trait Transform: Send + Sync {
    /// The type of data this transform accepts.
    type Input: Send + 'static;

    /// The type of data this transform produces.
    type Output: Send + 'static;

    /// Transform an input item.
    ///
    /// Returns `Ok(None)` to drop the item.
    fn apply(&self, input: Self::Input) -> Result<Option<Self::Output>>;

    /// Get the name of this transform.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<S: Source + ?Sized> Source for &mut S {
    type Output = S::Output;

    fn produce(&mut self) -> StageResult<Option<S::Output>> {
        (**self).produce()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<K: Sink + ?Sized> Sink for &mut K {
    type Input = K::Input;

    fn consume(&mut self, item: K::Input) {
        (**self).consume(item)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: Transform + ?Sized> Transform for &T {
    type Input = T::Input;
    type Output = T::Output;

    fn apply(&self, input: T::Input) -> Result<Option<T::Output>> {
        (**self).apply(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
