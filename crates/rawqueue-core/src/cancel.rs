//! Cooperative cancellation flag shared between a job and its canceller.
//!
//! A token is cheap to clone; every clone observes the same flag. Setting the
//! flag never interrupts anything by itself: the running job has to poll
//! [`CancellationToken::is_cancelled`] at its own checkpoints and return.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative job cancellation.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Idempotent, never blocks, and may be called from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel()` has been called on this token or any clone.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Build a predicate closure suitable for decoder-style cancel checks.
    pub fn as_predicate(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let token = self.clone();
        move || token.is_cancelled()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
