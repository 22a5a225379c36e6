//! Cooperative cancellation for workflow runs.
//!
//! A [`CancellationTokenSource`] is handed to the engine; the caller keeps a
//! clone and calls [`cancel()`](CancellationTokenSource::cancel) from anywhere.
//! Cancellation is cooperative: the engine stops submitting new attempts and
//! lets in-flight attempts finish, and collaborators may observe the token
//! through their [`InvocationContext`](super::collaborator::InvocationContext).
//!
//! # Example
//!
//! ```ignore
//! let source = CancellationTokenSource::new();
//! let token = source.token();
//!
//! tokio::select! {
//!     _ = token.cancelled() => { /* stop early */ }
//!     result = do_work() => { /* finished */ }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Thread-safe cancellation token.
///
/// Cloning a token creates a new reference to the same cancellation state.
/// When the owning source is cancelled, all clones report as cancelled.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until the token is cancelled.
    ///
    /// Returns immediately if cancellation already happened. Any number of
    /// tasks may wait at once; all are woken by a single cancel.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel
            // cannot slip between the check and the wait.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Owner of a cancellation token with the cancel() method.
///
/// Cloning a source creates a new handle to the same underlying token, so
/// the caller can keep one clone while the engine holds another.
#[derive(Clone, Debug)]
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    /// Creates a new cancellation source with a fresh token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the token. Idempotent.
    pub fn cancel(&self) {
        self.token.cancelled.store(true, Ordering::SeqCst);
        self.token.notify.notify_waiters();
    }

    /// Clears the cancellation flag for every clone of the token.
    pub fn reset(&self) {
        self.token.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancel() has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}
