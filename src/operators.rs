//! Closure-backed transforms: map, filter and friends.
//!
//! Every operator comes in an infallible form taking a plain closure and a
//! `try_` form whose closure returns a [`StageResult`]. Failures from the
//! `try_` forms are tagged with the operator's [`Stage`].

use std::marker::PhantomData;

use crate::element::Transform;
use crate::error::{Error, Result, Stage, StageResult};

// ============================================================================
// Map Operator
// ============================================================================

/// A transform that applies a fallible function to each item.
///
/// # Example
///
/// ```rust
/// use pipefold::element::Transform;
/// use pipefold::operators::try_map;
///
/// let parse = try_map(|s: String| Ok(i64::from_str_radix(&s, 2)?));
/// assert_eq!(parse.apply("10".to_string()).unwrap(), Some(2));
/// assert!(parse.apply("x".to_string()).is_err());
/// ```
pub struct Map<F, In, Out> {
    f: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<F, In, Out> Map<F, In, Out> {
    /// Create a new map operator.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, In, Out> Transform for Map<F, In, Out>
where
    F: Fn(In) -> StageResult<Out> + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    type Input = In;
    type Output = Out;

    fn apply(&self, input: In) -> Result<Option<Out>> {
        (self.f)(input)
            .map(Some)
            .map_err(|e| Error::transform(Stage::Map, e))
    }

    fn name(&self) -> &str {
        "map"
    }
}

/// Create a map transform from an infallible function.
pub fn map<F, In, Out>(f: F) -> Map<impl Fn(In) -> StageResult<Out> + Send + Sync, In, Out>
where
    F: Fn(In) -> Out + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    Map::new(move |x| Ok(f(x)))
}

/// Create a map transform from a fallible function.
pub fn try_map<F, In, Out>(f: F) -> Map<F, In, Out>
where
    F: Fn(In) -> StageResult<Out> + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    Map::new(f)
}

// ============================================================================
// Filter Operator
// ============================================================================

/// A transform that forwards items for which a fallible predicate holds.
pub struct Filter<F, T> {
    predicate: F,
    _t: PhantomData<fn(T) -> T>,
}

impl<F, T> Filter<F, T> {
    /// Create a new filter operator.
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _t: PhantomData,
        }
    }
}

impl<F, T> Transform for Filter<F, T>
where
    F: Fn(&T) -> StageResult<bool> + Send + Sync,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    fn apply(&self, input: T) -> Result<Option<T>> {
        match (self.predicate)(&input) {
            Ok(true) => Ok(Some(input)),
            Ok(false) => Ok(None),
            Err(e) => Err(Error::transform(Stage::Filter, e)),
        }
    }

    fn name(&self) -> &str {
        "filter"
    }
}

/// Create a filter transform from an infallible predicate.
///
/// ```rust
/// use pipefold::element::Transform;
/// use pipefold::operators::filter;
///
/// let even = filter(|x: &u32| *x % 2 == 0);
/// assert_eq!(even.apply(4).unwrap(), Some(4));
/// assert_eq!(even.apply(3).unwrap(), None);
/// ```
pub fn filter<F, T>(predicate: F) -> Filter<impl Fn(&T) -> StageResult<bool> + Send + Sync, T>
where
    F: Fn(&T) -> bool + Send + Sync,
    T: Send + 'static,
{
    Filter::new(move |x: &T| Ok(predicate(x)))
}

/// Create a filter transform from a fallible predicate.
pub fn try_filter<F, T>(predicate: F) -> Filter<F, T>
where
    F: Fn(&T) -> StageResult<bool> + Send + Sync,
    T: Send + 'static,
{
    Filter::new(predicate)
}

// ============================================================================
// FilterMap Operator
// ============================================================================

/// A transform that combines filter and map in one step.
///
/// Failures are attributed to [`Stage::Map`].
pub struct FilterMap<F, In, Out> {
    f: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<F, In, Out> FilterMap<F, In, Out> {
    /// Create a new filter_map operator.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, In, Out> Transform for FilterMap<F, In, Out>
where
    F: Fn(In) -> StageResult<Option<Out>> + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    type Input = In;
    type Output = Out;

    fn apply(&self, input: In) -> Result<Option<Out>> {
        (self.f)(input).map_err(|e| Error::transform(Stage::Map, e))
    }

    fn name(&self) -> &str {
        "filter_map"
    }
}

/// Create a filter_map transform from an infallible function.
pub fn filter_map<F, In, Out>(
    f: F,
) -> FilterMap<impl Fn(In) -> StageResult<Option<Out>> + Send + Sync, In, Out>
where
    F: Fn(In) -> Option<Out> + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    FilterMap::new(move |x| Ok(f(x)))
}

/// Create a filter_map transform from a fallible function.
pub fn try_filter_map<F, In, Out>(f: F) -> FilterMap<F, In, Out>
where
    F: Fn(In) -> StageResult<Option<Out>> + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    FilterMap::new(f)
}

// ============================================================================
// Inspect Operator
// ============================================================================

/// A transform that observes items without modifying them.
pub struct Inspect<F, T> {
    f: F,
    _t: PhantomData<fn(T) -> T>,
}

impl<F, T> Inspect<F, T> {
    /// Create a new inspect operator.
    pub fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<F, T> Transform for Inspect<F, T>
where
    F: Fn(&T) + Send + Sync,
    T: Send + 'static,
{
    type Input = T;
    type Output = T;

    fn apply(&self, input: T) -> Result<Option<T>> {
        (self.f)(&input);
        Ok(Some(input))
    }

    fn name(&self) -> &str {
        "inspect"
    }
}

/// Create an inspect transform.
pub fn inspect<F, T>(f: F) -> Inspect<F, T>
where
    F: Fn(&T) + Send + Sync,
    T: Send + 'static,
{
    Inspect::new(f)
}

// ============================================================================
// Passthrough
// ============================================================================

/// The identity transform.
pub struct Passthrough<T> {
    _t: PhantomData<fn(T) -> T>,
}

impl<T> Passthrough<T> {
    /// Create a new passthrough.
    pub fn new() -> Self {
        Self { _t: PhantomData }
    }
}

impl<T> Default for Passthrough<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Transform for Passthrough<T> {
    type Input = T;
    type Output = T;

    fn apply(&self, input: T) -> Result<Option<T>> {
        Ok(Some(input))
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Create an identity transform.
pub fn passthrough<T: Send + 'static>() -> Passthrough<T> {
    Passthrough::new()
}
