//! Cancellable pause used before the HTML retry.
//!
//! # Design
//! A plain `thread::sleep` cannot be interrupted, so a worker stuck in a retry
//! pause would hold up shutdown. `CancelToken` parks the thread on a condvar
//! instead; `cancel()` wakes every waiter at once. Cancellation is sticky.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (cancelled, waiters) = &*self.inner;
        *cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        waiters.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for `duration` unless cancelled first.
    ///
    /// Returns `true` when the full duration elapsed and `false` when the
    /// token was (or already had been) cancelled.
    pub fn wait(&self, duration: Duration) -> bool {
        let (cancelled, waiters) = &*self.inner;
        let guard = cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = waiters
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }
}
