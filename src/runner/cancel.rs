//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Handle used to cancel a running pipeline from another thread.
///
/// Cancellation is cooperative: runners check the token before every pull
/// from the source. Transform calls that are already running are not
/// interrupted, but their results are discarded and the run returns
/// [`Error::Cancelled`](crate::Error::Cancelled).
///
/// # Example
///
/// ```rust
/// use pipefold::runner::CancelToken;
///
/// let token = CancelToken::new();
/// let remote = token.clone();
/// remote.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that is cancelled together with `self`.
    ///
    /// Cancelling the child does not cancel the parent.
    pub fn child_token(&self) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// Combined cancellation token and deadline for one run.
#[derive(Debug, Clone, Default)]
pub(crate) struct StopCondition {
    token: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl StopCondition {
    /// The deadline is measured from this call. A timeout too large to
    /// represent as an `Instant` means no deadline.
    pub(crate) fn new(token: Option<&CancelToken>, timeout: Option<Duration>) -> Self {
        Self {
            token: token.cloned(),
            deadline: timeout.and_then(|t| Instant::now().checked_add(t)),
        }
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.token.as_ref().is_some_and(CancelToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}
