//! Resilience policies: Retry and Timeout
//!
//! A [`Policy`] is one behaviour with its own parameters. Policies are
//! immutable once built and cheap to clone; chains share them behind `Arc`.
//!
//! The retry/timeout decisions live here so the blocking and non-blocking
//! executors in [`crate::chain`] only differ in how they sleep and wait.

use crate::backoff::Backoff;
use crate::error::{ConfigError, ResilienceError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides which failures a retry policy handles
///
/// Fault classification is always injected: the engine has no built-in idea
/// of which provider errors are transient.
pub struct FaultPredicate<E> {
    matcher: Arc<dyn Fn(&ResilienceError<E>) -> bool + Send + Sync>,
}

impl<E: 'static> FaultPredicate<E> {
    /// Match on the full chain error, timeouts included
    pub fn new<F>(matcher: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        Self {
            matcher: Arc::new(matcher),
        }
    }

    /// Match operation faults only
    pub fn faults<F>(matcher: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::new(move |err| match err {
            ResilienceError::Fault(e) => matcher(e),
            ResilienceError::Timeout { .. } => false,
        })
    }

    /// Match timeouts raised by inner timeout policies
    pub fn timeouts() -> Self {
        Self::new(ResilienceError::is_timeout)
    }

    /// Match anything
    pub fn any() -> Self {
        Self::new(|_| true)
    }

    /// Match when either predicate matches
    pub fn or(self, other: FaultPredicate<E>) -> Self {
        let (left, right) = (self.matcher, other.matcher);
        Self::new(move |err| left(err) || right(err))
    }
}

impl<E> FaultPredicate<E> {
    /// Check whether this predicate handles the given failure
    pub fn matches(&self, err: &ResilienceError<E>) -> bool {
        (self.matcher)(err)
    }
}

impl<E> Clone for FaultPredicate<E> {
    fn clone(&self) -> Self {
        Self {
            matcher: Arc::clone(&self.matcher),
        }
    }
}

impl<E> fmt::Debug for FaultPredicate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FaultPredicate(<fn>)")
    }
}

/// Retries handled failures with a backoff delay between attempts
///
/// # Example
/// ```
/// use bulwark_core_resilience::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let retry = RetryPolicy::<std::io::Error>::on_fault(|e| e.kind() == std::io::ErrorKind::TimedOut)
///     .or_timeout()
///     .max_retries(3)
///     .backoff(Backoff::constant(Duration::from_secs(1)))
///     .build();
///
/// assert_eq!(retry.max_retries(), 3);
/// ```
pub struct RetryPolicy<E> {
    max_retries: u32,
    backoff: Backoff,
    predicate: FaultPredicate<E>,
}

impl<E: 'static> RetryPolicy<E> {
    /// Start a retry policy handling the failures `predicate` matches
    pub fn handle(predicate: FaultPredicate<E>) -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new(predicate)
    }

    /// Start a retry policy handling operation faults `matcher` accepts
    pub fn on_fault<F>(matcher: F) -> RetryPolicyBuilder<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::handle(FaultPredicate::faults(matcher))
    }
}

impl<E> RetryPolicy<E> {
    /// Additional attempts allowed after the first one
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay schedule between attempts
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Check if this policy handles the failure at all
    pub fn handles(&self, err: &ResilienceError<E>) -> bool {
        self.predicate.matches(err)
    }

    /// Delay before the next attempt, or `None` if the failure must surface
    ///
    /// `retries_so_far` counts retries already made (0 after the first
    /// attempt fails).
    pub fn next_delay(&self, retries_so_far: u32, err: &ResilienceError<E>) -> Option<Duration> {
        if retries_so_far >= self.max_retries || !self.handles(err) {
            return None;
        }

        Some(self.backoff.delay(retries_so_far + 1))
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            backoff: self.backoff.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryPolicy`]
pub struct RetryPolicyBuilder<E> {
    max_retries: u32,
    backoff: Backoff,
    predicate: FaultPredicate<E>,
}

impl<E: 'static> RetryPolicyBuilder<E> {
    fn new(predicate: FaultPredicate<E>) -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            predicate,
        }
    }

    /// Also retry timeouts raised by inner timeout policies
    pub fn or_timeout(mut self) -> Self {
        self.predicate = self.predicate.or(FaultPredicate::timeouts());
        self
    }

    /// Additional attempts allowed after the first one
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            predicate: self.predicate,
        }
    }
}

/// How a timeout policy enforces its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutStrategy {
    /// Cancel the shared signal and wait for the operation to notice
    Optimistic,
    /// Stop waiting at the deadline and abandon the operation
    Pessimistic,
}

impl fmt::Display for TimeoutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStrategy::Optimistic => write!(f, "optimistic"),
            TimeoutStrategy::Pessimistic => write!(f, "pessimistic"),
        }
    }
}

/// Bounds the time an operation (and everything inside it) may take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
    strategy: TimeoutStrategy,
}

impl TimeoutPolicy {
    pub fn new(duration: Duration, strategy: TimeoutStrategy) -> Self {
        Self { duration, strategy }
    }

    /// Cooperative timeout: the operation must honour the cancel signal
    pub fn optimistic(duration: Duration) -> Self {
        Self::new(duration, TimeoutStrategy::Optimistic)
    }

    /// Abandon-on-deadline timeout
    pub fn pessimistic(duration: Duration) -> Self {
        Self::new(duration, TimeoutStrategy::Pessimistic)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn strategy(&self) -> TimeoutStrategy {
        self.strategy
    }

    /// The error this policy raises when its deadline passes
    pub fn elapsed<E>(&self) -> ResilienceError<E> {
        ResilienceError::Timeout {
            timeout: self.duration,
            strategy: self.strategy,
        }
    }
}

/// A single resilience behaviour
pub enum Policy<E> {
    Retry(RetryPolicy<E>),
    Timeout(TimeoutPolicy),
}

impl<E> Policy<E> {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Policy::Retry(_) => "retry",
            Policy::Timeout(_) => "timeout",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Policy::Timeout(timeout) if timeout.duration().is_zero() => Err(
                ConfigError::InvalidPolicy("timeout duration must be greater than zero".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl<E> From<RetryPolicy<E>> for Policy<E> {
    fn from(retry: RetryPolicy<E>) -> Self {
        Policy::Retry(retry)
    }
}

impl<E> From<TimeoutPolicy> for Policy<E> {
    fn from(timeout: TimeoutPolicy) -> Self {
        Policy::Timeout(timeout)
    }
}

impl<E: 'static> From<RetryPolicyBuilder<E>> for Policy<E> {
    fn from(builder: RetryPolicyBuilder<E>) -> Self {
        Policy::Retry(builder.build())
    }
}

impl<E> Clone for Policy<E> {
    fn clone(&self) -> Self {
        match self {
            Policy::Retry(retry) => Policy::Retry(retry.clone()),
            Policy::Timeout(timeout) => Policy::Timeout(*timeout),
        }
    }
}

impl<E> fmt::Debug for Policy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Retry(retry) => fmt::Debug::fmt(retry, f),
            Policy::Timeout(timeout) => fmt::Debug::fmt(timeout, f),
        }
    }
}
