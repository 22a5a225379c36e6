//! Bounded concurrency pool for task attempts.
//!
//! This module provides a semaphore-based executor that runs at most
//! `capacity` futures at a time. The pool knows nothing about tasks; it
//! runs opaque futures and hands their output back through a [`PoolHandle`].

use crate::error::{PhaseKitError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bounded executor.
///
/// Submission waits while every lane is busy; work is never dropped.
///
/// # Examples
///
/// ```no_run
/// use phasekit_core::pool::ConcurrencyPool;
///
/// # #[tokio::main]
/// # async fn main() -> phasekit_core::Result<()> {
/// let pool = ConcurrencyPool::new(5);
/// let handle = pool.submit(async { 40 + 2 }).await?;
/// assert_eq!(handle.await?, 42);
/// #     Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ConcurrencyPool {
    /// Semaphore for limiting lanes.
    semaphore: Arc<Semaphore>,
    /// Number of lanes.
    capacity: usize,
}

impl ConcurrencyPool {
    /// Default number of lanes.
    pub const DEFAULT_CAPACITY: usize = 5;

    /// Creates a pool with `capacity` lanes (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Runs `fut` on a free lane, waiting for one if all are occupied.
    ///
    /// Returns once the future has been started; await the returned
    /// handle for its output.
    pub async fn submit<F>(&self, fut: F) -> Result<PoolHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PhaseKitError::PoolClosed)?;

        let inner = tokio::spawn(async move {
            let _permit = permit;
            fut.await
        });

        Ok(PoolHandle { inner })
    }

    /// Returns the configured number of lanes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ConcurrencyPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Output of a submitted future.
///
/// Resolves to `Err(PhaseKitError::LaneFailed)` if the future panicked.
#[derive(Debug)]
pub struct PoolHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> Future for PoolHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|res| res.map_err(|e| PhaseKitError::LaneFailed(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = ConcurrencyPool::default();
        assert_eq!(pool.capacity(), 5);
        assert_eq!(ConcurrencyPool::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_submit_returns_output() {
        let pool = ConcurrencyPool::new(2);
        let handle = pool.submit(async { "done" }).await.unwrap();
        assert_eq!(handle.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_capacity_is_never_exceeded() {
        let pool = ConcurrencyPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..6 {
            let active = active.clone();
            let peak = peak.clone();
            let handle = pool
                .submit(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            handles.push(handle);
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_reported_as_lane_failure() {
        let pool = ConcurrencyPool::new(1);
        let handle = pool
            .submit(async {
                panic!("boom");
            })
            .await
            .unwrap();
        assert!(matches!(handle.await, Err(PhaseKitError::LaneFailed(_))));

        // The panicked job released its lane
        let next = tokio::time::timeout(Duration::from_secs(1), pool.submit(async { 7 }))
            .await
            .expect("lane should be free")
            .unwrap();
        assert_eq!(next.await.unwrap(), 7);
    }
}
