//! # Pipefold
//!
//! Generic streaming Map/Filter/Fold pipelines.
//!
//! A pipeline pulls elements from a [`Source`](element::Source), passes each
//! one through a [`Transform`](element::Transform) that may map it, drop it
//! or fail, and hands the survivors to a [`Sink`](element::Sink). Elements
//! can instead be folded into a single accumulator.
//!
//! ## Features
//!
//! - **Sequential runner**: one element at a time, total order preserved
//! - **Parallel runner**: fan-out/fan-in over a worker pool, in source order
//!   or completion order, with a bounded in-flight window
//! - **Cancellation**: external tokens and timeouts, checked between elements
//! - **Parallel fold**: chunked folding with an associative tree merge
//! - **Typed builder**: element types checked at compile time
//!
//! ## Quick Start
//!
//! ```rust
//! use pipefold::prelude::*;
//!
//! // Free functions over borrowed sources and sinks
//! let mut source = from_iter(["1", "10", "11"]);
//! let mut sink = collect();
//! run_map(&mut source, &mut sink, |s: &str| Ok(u32::from_str_radix(s, 2)?))?;
//! assert_eq!(sink.into_inner(), vec![1, 2, 3]);
//!
//! // Typed pipeline on a worker pool
//! let sink = pipeline(range(0u64..100))
//!     .then(filter(|x: &u64| x % 2 == 0))
//!     .then(map(|x: u64| x * x))
//!     .sink(collect())
//!     .run_parallel(&ParallelConfig::new(4))?;
//! assert_eq!(&sink.items()[..3], &[0, 4, 16]);
//! # Ok::<(), pipefold::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod element;
pub mod error;
pub mod observability;
pub mod operators;
pub mod pipeline;
pub mod reduce;
pub mod runner;
pub mod sinks;
pub mod sources;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::element::{Sink, Source, Transform};
    pub use crate::error::{BoxError, Error, Result, Stage, StageResult};
    pub use crate::operators::{
        filter, filter_map, inspect, map, passthrough, try_filter, try_filter_map, try_map,
    };
    pub use crate::pipeline::pipeline;
    pub use crate::reduce::{FoldConfig, fold, fold_parallel, fold_with, reduce};
    pub use crate::runner::{
        CancelToken, ParallelConfig, ParallelRunner, RunStats, SequentialRunner, run, run_filter,
        run_map, run_parallel,
    };
    pub use crate::sinks::{collect, discard, for_each};
    pub use crate::sources::{from_fn, from_iter, once, range, repeat_with, try_from_iter};
}

pub use error::{BoxError, Error, Result, Stage, StageResult};
