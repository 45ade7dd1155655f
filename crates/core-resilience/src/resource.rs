//! Resources lent to operations that may outlive their caller
//!
//! A blocking call cannot be interrupted. A pessimistic timeout on the
//! blocking path therefore runs the call on a worker thread and walks away
//! at the deadline. The worker keeps its share of the resource until the call
//! finally returns, and the owner gets exclusive access back after that.

use crate::cancel::CancelSignal;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

const RECLAIM_POLL: Duration = Duration::from_millis(10);

/// A resource the blocking path can hand to timeout workers
///
/// # Example
/// ```
/// use bulwark_core_resilience::SharedResource;
///
/// let mut rows = SharedResource::new(Vec::<u32>::new());
/// rows.lock().push(1);
///
/// assert!(!rows.is_lent());
/// assert_eq!(rows.get_mut().map(|rows| rows.len()), Some(1));
/// ```
pub struct SharedResource<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> SharedResource<R> {
    pub fn new(resource: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(resource)),
        }
    }

    /// Wait for exclusive access
    ///
    /// Blocks while an abandoned attempt is still running on the resource.
    /// A panic inside an earlier attempt does not make the resource unusable.
    pub fn lock(&self) -> MutexGuard<'_, R> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Access the resource if no attempt is running on it right now
    pub fn try_lock(&self) -> Option<MutexGuard<'_, R>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Whether an abandoned worker still holds a share
    pub fn is_lent(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    /// Exclusive access without locking, unless a worker still holds a share
    pub fn get_mut(&mut self) -> Option<&mut R> {
        Arc::get_mut(&mut self.inner)
            .map(|resource| resource.get_mut().unwrap_or_else(PoisonError::into_inner))
    }

    /// Wait until every abandoned worker has let go, then borrow mutably
    ///
    /// Returns `None` if `signal` trips first.
    pub async fn reclaim(&mut self, signal: &CancelSignal) -> Option<&mut R> {
        while self.is_lent() {
            if !signal.sleep(RECLAIM_POLL).await {
                return None;
            }
        }
        self.get_mut()
    }

    /// Another handle to the same resource, for a worker thread
    pub(crate) fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for SharedResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(resource) => f.debug_tuple("SharedResource").field(&*resource).finish(),
            None => f.write_str("SharedResource(<in use>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_blocks_exclusive_access() {
        let mut resource = SharedResource::new(5u32);
        let worker = resource.share();

        assert!(resource.is_lent());
        assert!(resource.get_mut().is_none());
        *worker.lock() += 1;

        drop(worker);
        assert_eq!(resource.get_mut().copied(), Some(6));
    }

    #[test]
    fn test_try_lock_reports_busy_resource() {
        let resource = SharedResource::new(String::from("idle"));
        let worker = resource.share();
        let guard = worker.lock();

        assert!(resource.try_lock().is_none());
        assert_eq!(format!("{resource:?}"), "SharedResource(<in use>)");

        drop(guard);
        assert_eq!(resource.try_lock().as_deref().map(String::as_str), Some("idle"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_waits_for_worker() {
        let mut resource = SharedResource::new(0u32);
        let worker = resource.share();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            *worker.lock() = 42;
        });

        let value = resource.reclaim(&CancelSignal::new()).await.copied();

        assert_eq!(value, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_gives_up_when_cancelled() {
        let mut resource = SharedResource::new(0u32);
        let _worker = resource.share();

        let signal = CancelSignal::with_timeout(Duration::from_millis(50));

        assert!(resource.reclaim(&signal).await.is_none());
    }
}
