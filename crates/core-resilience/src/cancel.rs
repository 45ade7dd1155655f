//! Cooperative cancellation shared between policies and operations
//!
//! A [`CancelSignal`] is a cancellation token plus an optional deadline.
//! Timeout policies hand a child signal to everything inside them; the child
//! trips when the parent is cancelled, when it is cancelled itself, or when
//! the earliest deadline in its ancestry passes.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal observed by operations running inside a policy chain
///
/// # Example
/// ```
/// use bulwark_core_resilience::CancelSignal;
/// use std::time::Duration;
///
/// let root = CancelSignal::new();
/// let child = root.child_with_timeout(Duration::from_secs(30));
///
/// assert!(!child.is_cancelled());
/// root.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that only trips when cancelled explicitly
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also trips once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Trip this signal and every child derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check whether the operation should stop
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline_elapsed()
    }

    /// Earliest deadline inherited by this signal
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if there is one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn deadline_elapsed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Child that trips with this signal
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child that also trips at `deadline` (or earlier, if inherited)
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(inherited) => inherited.min(deadline),
            None => deadline,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Child that also trips after `timeout`
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child_with_deadline(Instant::now() + timeout)
    }

    /// Resolves once the signal trips
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Sleep for `delay` unless the signal trips first
    ///
    /// Returns `true` if the full delay elapsed with the signal still live.
    pub async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(delay) => !self.is_cancelled(),
        }
    }

    /// Blocking counterpart of [`CancelSignal::sleep`]
    ///
    /// The sleep is cut short at the deadline. An explicit `cancel()` from
    /// another thread is only noticed once the sleep ends.
    pub fn sleep_blocking(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let delay = self
            .remaining()
            .map_or(delay, |remaining| remaining.min(delay));
        std::thread::sleep(delay);
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_inherits_cancellation() {
        let root = CancelSignal::new();
        let child = root.child();
        let grandchild = child.child_with_timeout(Duration::from_secs(60));

        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let root = CancelSignal::new();
        let child = root.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_child_keeps_earliest_deadline() {
        let outer = CancelSignal::with_timeout(Duration::from_millis(100));
        let inner = outer.child_with_timeout(Duration::from_secs(60));
        assert_eq!(inner.deadline(), outer.deadline());

        let tighter = outer.child_with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < outer.deadline());
    }

    #[test]
    fn test_blocking_sleep_stops_at_deadline() {
        let signal = CancelSignal::with_timeout(Duration::from_millis(20));
        let start = std::time::Instant::now();

        assert!(!signal.sleep_blocking(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_blocking_sleep_skipped_when_already_cancelled() {
        let signal = CancelSignal::new();
        signal.cancel();
        let start = std::time::Instant::now();

        assert!(!signal.sleep_blocking(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_cancelled_future_wakes_on_cancel() {
        let signal = CancelSignal::new();
        let mut waiter = tokio_test::task::spawn(signal.cancelled());

        tokio_test::assert_pending!(waiter.poll());
        signal.cancel();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_trips_cancelled_future() {
        let signal = CancelSignal::with_timeout(Duration::from_secs(5));
        let start = Instant::now();

        signal.cancelled().await;

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let signal = CancelSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        assert!(!signal.sleep(Duration::from_secs(10)).await);
        assert!(CancelSignal::new().sleep(Duration::from_millis(10)).await);
    }
}
