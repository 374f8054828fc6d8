//! Error types for pipefold.
//!
//! Every run returns at most one [`Error`], and every variant names the
//! stage that failed. Caller-supplied capabilities (sources, mappers,
//! predicates, combiners, merge functions) report failures as [`BoxError`];
//! the runners attach the stage and hand the inner error back unchanged.

use std::fmt;

use thiserror::Error;

/// Boxed error returned by caller-supplied capabilities.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for caller-supplied capabilities.
pub type StageResult<T> = std::result::Result<T, BoxError>;

/// Result type alias using pipefold's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The transform stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// A mapper (`T -> U`).
    Map,
    /// A predicate (`&T -> bool`).
    Filter,
    /// A fold combiner (`(Acc, T) -> Acc`).
    Combine,
    /// A merge of two partial accumulators.
    Merge,
}

impl Stage {
    /// Short lowercase name, used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Map => "map",
            Stage::Filter => "filter",
            Stage::Combine => "combine",
            Stage::Merge => "merge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for pipefold operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The source reported a failure other than exhaustion.
    #[error("source failed: {0}")]
    Source(#[source] BoxError),

    /// A transform (mapper, predicate, combiner or merge) failed.
    #[error("{stage} stage failed: {source}")]
    Transform {
        /// Which kind of transform failed.
        stage: Stage,
        /// The error returned by the transform, unchanged.
        #[source]
        source: BoxError,
    },

    /// The run was cancelled or its deadline passed.
    #[error("pipeline run cancelled")]
    Cancelled,

    /// Configuration was rejected before the run started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread panicked.
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),

    /// A worker thread could not be spawned.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task could not be joined.
    #[error("join error: {0}")]
    Join(String),
}

impl Error {
    /// Wrap a source failure.
    pub fn source_failed(err: impl Into<BoxError>) -> Self {
        Error::Source(err.into())
    }

    /// Wrap a transform failure for the given stage.
    pub fn transform(stage: Stage, err: impl Into<BoxError>) -> Self {
        Error::Transform {
            stage,
            source: err.into(),
        }
    }

    /// The failing transform stage, if this is a transform failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Transform { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns true if this is a source failure.
    pub fn is_source(&self) -> bool {
        matches!(self, Error::Source(_))
    }

    /// Returns true if this is a transform failure.
    pub fn is_transform(&self) -> bool {
        matches!(self, Error::Transform { .. })
    }

    /// Returns true if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The caller's original error, for source and transform failures.
    pub fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Error::Source(e) | Error::Transform { source: e, .. } => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Take the caller's original error, for source and transform failures.
    pub fn into_inner(self) -> Option<BoxError> {
        match self {
            Error::Source(e) | Error::Transform { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Normalize an error returned by [`Transform::apply`](crate::element::Transform::apply).
    ///
    /// Transform failures pass through. Any other variant is wrapped as a
    /// `Map` failure so it cannot pose as a source failure or a cancellation.
    pub(crate) fn in_transform(self) -> Self {
        match self {
            Error::Transform { .. } => self,
            other => Error::Transform {
                stage: Stage::Map,
                source: Box::new(other),
            },
        }
    }

    /// Label used for the error metric.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Error::Source(_) => "source",
            Error::Transform { stage, .. } => stage.as_str(),
            Error::Cancelled => "cancelled",
            Error::InvalidConfig(_) => "config",
            Error::WorkerPanicked(_) => "panic",
            Error::Io(_) => "io",
            Error::Join(_) => "join",
        }
    }
}
