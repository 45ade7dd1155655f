//! Policy chain composition and execution
//!
//! A [`PolicyChain`] is an ordered, non-empty list of policies, outermost
//! first. Executing the chain runs the first policy around the rest of the
//! chain, recursively, with the caller's operation at the centre:
//!
//! ```text
//!   Retry ──► Timeout ──► operation(resource, signal)
//!     ▲          │
//!     └──────────┘  every retry re-runs the whole inner chain
//! ```
//!
//! One chain is composed per execution path. The blocking path runs the
//! operation on the calling thread, except under a pessimistic timeout, where
//! the rest of the chain moves to a worker thread that is abandoned at the
//! deadline. The non-blocking path awaits the operation. Both walk the chain
//! the same way and share the retry/timeout decisions defined on the policy
//! types.

use crate::cancel::CancelSignal;
use crate::context::ExecutionContext;
use crate::error::{ConfigError, ResilienceError};
use crate::policy::{Policy, RetryPolicy, TimeoutPolicy, TimeoutStrategy};
use crate::resource::SharedResource;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, debug_span, warn, Instrument, Span};

/// Which calling convention a chain serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// Calling thread owns the call
    Blocking,
    /// Call suspends at I/O boundaries
    NonBlocking,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPath::Blocking => write!(f, "blocking"),
            ExecutionPath::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

type BlockingOperation<R, T, E> = dyn Fn(&mut R, &CancelSignal) -> Result<T, E> + Send + Sync;

type AsyncOperation<'o, R, T, E> =
    dyn for<'r> FnMut(&'r mut R, CancelSignal) -> BoxFuture<'r, Result<T, E>> + Send + 'o;

/// Ordered policies executed as a single unit
///
/// # Example
/// ```
/// use bulwark_core_resilience::{
///     Backoff, CancelSignal, ExecutionContext, ExecutionPath, PolicyChain, RetryPolicy,
///     SharedResource,
/// };
///
/// let chain = PolicyChain::compose(
///     ExecutionPath::Blocking,
///     vec![RetryPolicy::on_fault(|e: &String| e == "busy")
///         .max_retries(2)
///         .backoff(Backoff::none())
///         .into()],
/// )
/// .unwrap();
///
/// let context = ExecutionContext::build("ping", ());
/// let attempts = SharedResource::new(0);
/// let result = chain.execute(&context, &CancelSignal::new(), &attempts, |attempts, _| {
///     *attempts += 1;
///     if *attempts < 3 { Err("busy".to_string()) } else { Ok("pong") }
/// });
///
/// assert_eq!(result.unwrap(), "pong");
/// assert_eq!(*attempts.lock(), 3);
/// ```
pub struct PolicyChain<E> {
    path: ExecutionPath,
    policies: Arc<[Policy<E>]>,
}

impl<E> PolicyChain<E> {
    /// Compose policies, outermost first
    ///
    /// Fails if the list is empty or a policy has unusable parameters.
    pub fn compose<I>(path: ExecutionPath, policies: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Policy<E>>,
    {
        let policies: Vec<Policy<E>> = policies.into_iter().collect();
        if policies.is_empty() {
            return Err(ConfigError::EmptyPolicyList { path });
        }

        for policy in &policies {
            policy.validate()?;
        }

        Ok(Self {
            path,
            policies: policies.into(),
        })
    }

    pub fn path(&self) -> ExecutionPath {
        self.path
    }

    /// Policies in execution order, outermost first
    pub fn policies(&self) -> &[Policy<E>] {
        &self.policies
    }

    fn span<M>(&self, context: &ExecutionContext<M>) -> Span {
        debug_span!(
            "policy_chain",
            path = %self.path,
            operation = context.operation_key(),
            policies = self.policies.len(),
        )
    }

    /// Run a blocking operation through the chain
    ///
    /// `resource` is locked and lent to the operation on every attempt. The
    /// operation should check `signal` if it wants to honour optimistic
    /// timeouts. Under a pessimistic timeout the attempt runs on a worker
    /// thread; once the deadline passes the worker is abandoned and keeps the
    /// resource locked until the operation returns.
    pub fn execute<M, R, T, F>(
        &self,
        context: &ExecutionContext<M>,
        signal: &CancelSignal,
        resource: &SharedResource<R>,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        M: fmt::Debug,
        R: Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(&mut R, &CancelSignal) -> Result<T, E> + Send + Sync + 'static,
    {
        let span = self.span(context);
        let _entered = span.enter();
        debug!(metadata = ?context.metadata(), "Executing through policy chain");

        let operation: Arc<BlockingOperation<R, T, E>> = Arc::new(operation);
        run_blocking(&self.policies, 0, resource, signal, &operation)
    }

    /// Run a non-blocking operation through the chain
    ///
    /// The operation receives the resource and a child of `signal` and
    /// returns a boxed future borrowing the resource.
    pub async fn execute_async<M, R, T, F>(
        &self,
        context: &ExecutionContext<M>,
        signal: &CancelSignal,
        resource: &mut R,
        mut operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        M: fmt::Debug + Sync,
        R: Send,
        T: Send,
        E: fmt::Display + Send,
        F: for<'r> FnMut(&'r mut R, CancelSignal) -> BoxFuture<'r, Result<T, E>> + Send,
    {
        let span = self.span(context);
        span.in_scope(|| debug!(metadata = ?context.metadata(), "Executing through policy chain"));

        run_non_blocking(&self.policies, resource, signal.clone(), &mut operation)
            .instrument(span)
            .await
    }
}

impl<E> Clone for PolicyChain<E> {
    fn clone(&self) -> Self {
        Self {
            path: self.path,
            policies: Arc::clone(&self.policies),
        }
    }
}

impl<E> fmt::Debug for PolicyChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyChain")
            .field("path", &self.path)
            .field("policies", &self.policies)
            .finish()
    }
}

/// Validated blocking and non-blocking chains for one decorator
///
/// Both lists are checked once, here. Cloning shares the composed chains, so
/// resources derived from a decorator reuse its policies without
/// re-validation.
pub struct ResiliencePolicies<E> {
    blocking: PolicyChain<E>,
    non_blocking: PolicyChain<E>,
}

impl<E> ResiliencePolicies<E> {
    pub fn new<B, N>(blocking: B, non_blocking: N) -> Result<Self, ConfigError>
    where
        B: IntoIterator<Item = Policy<E>>,
        N: IntoIterator<Item = Policy<E>>,
    {
        Ok(Self {
            blocking: PolicyChain::compose(ExecutionPath::Blocking, blocking)?,
            non_blocking: PolicyChain::compose(ExecutionPath::NonBlocking, non_blocking)?,
        })
    }

    pub fn blocking(&self) -> &PolicyChain<E> {
        &self.blocking
    }

    pub fn non_blocking(&self) -> &PolicyChain<E> {
        &self.non_blocking
    }
}

impl<E> Clone for ResiliencePolicies<E> {
    fn clone(&self) -> Self {
        Self {
            blocking: self.blocking.clone(),
            non_blocking: self.non_blocking.clone(),
        }
    }
}

impl<E> fmt::Debug for ResiliencePolicies<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePolicies")
            .field("blocking", &self.blocking)
            .field("non_blocking", &self.non_blocking)
            .finish()
    }
}

/// Ask the retry policy for the next delay and log the decision
fn schedule_retry<E: fmt::Display>(
    retry: &RetryPolicy<E>,
    retries: u32,
    err: &ResilienceError<E>,
) -> Option<Duration> {
    match retry.next_delay(retries, err) {
        Some(delay) => {
            warn!(
                retry = retries + 1,
                max_retries = retry.max_retries(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Handled fault, retrying"
            );
            Some(delay)
        }
        None => {
            if retries > 0 && retry.handles(err) {
                warn!(retries, error = %err, "Retries exhausted");
            }
            None
        }
    }
}

fn report_timeout(timeout: &TimeoutPolicy) {
    warn!(
        timeout_ms = timeout.duration().as_millis() as u64,
        strategy = %timeout.strategy(),
        "Timeout elapsed"
    );
}

/// Convert a failure that surfaced after the deadline into a timeout
fn settle<T, E>(
    timeout: &TimeoutPolicy,
    deadline: Instant,
    outcome: Result<T, ResilienceError<E>>,
) -> Result<T, ResilienceError<E>> {
    match outcome {
        Err(_) if Instant::now() >= deadline => {
            report_timeout(timeout);
            Err(timeout.elapsed())
        }
        outcome => outcome,
    }
}

fn run_blocking<R, T, E>(
    policies: &Arc<[Policy<E>]>,
    depth: usize,
    resource: &SharedResource<R>,
    signal: &CancelSignal,
    operation: &Arc<BlockingOperation<R, T, E>>,
) -> Result<T, ResilienceError<E>>
where
    R: Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let Some(policy) = policies.get(depth) else {
        let mut resource = resource.lock();
        return operation(&mut *resource, signal).map_err(ResilienceError::Fault);
    };

    match policy {
        Policy::Retry(retry) => {
            let mut retries = 0;
            loop {
                let err = match run_blocking(policies, depth + 1, resource, signal, operation) {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                };

                let Some(delay) = schedule_retry(retry, retries, &err) else {
                    return Err(err);
                };
                retries += 1;

                if !signal.sleep_blocking(delay) {
                    debug!(retries, "Signal tripped during backoff");
                    return Err(err);
                }
            }
        }
        Policy::Timeout(timeout) => {
            let deadline = Instant::now() + timeout.duration();
            let child = signal.child_with_deadline(deadline);

            match timeout.strategy() {
                TimeoutStrategy::Pessimistic => {
                    match run_detached(policies, depth + 1, resource, &child, deadline, operation) {
                        Some(outcome) => settle(timeout, deadline, outcome),
                        None => {
                            child.cancel();
                            report_timeout(timeout);
                            Err(timeout.elapsed())
                        }
                    }
                }
                TimeoutStrategy::Optimistic => {
                    let outcome = run_blocking(policies, depth + 1, resource, &child, operation);
                    if Instant::now() >= deadline {
                        child.cancel();
                    }
                    settle(timeout, deadline, outcome)
                }
            }
        }
    }
}

/// Run the rest of the chain on a worker thread and wait until `deadline`
///
/// Returns `None` when the deadline passes first. The worker is left to
/// finish on its own and its outcome is dropped.
fn run_detached<R, T, E>(
    policies: &Arc<[Policy<E>]>,
    depth: usize,
    resource: &SharedResource<R>,
    signal: &CancelSignal,
    deadline: Instant,
    operation: &Arc<BlockingOperation<R, T, E>>,
) -> Option<Result<T, ResilienceError<E>>>
where
    R: Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = {
        let policies = Arc::clone(policies);
        let resource = resource.share();
        let signal = signal.clone();
        let operation = Arc::clone(operation);
        let span = Span::current();

        thread::Builder::new()
            .name("bulwark-timeout".to_string())
            .spawn(move || {
                let _entered = span.enter();
                let outcome = run_blocking(&policies, depth, &resource, &signal, &operation);
                drop(resource);
                // The caller may have given up already.
                let _ = tx.send(outcome);
            })
    };

    let worker = match spawned {
        Ok(worker) => worker,
        Err(err) => {
            warn!(error = %err, "Failed to start timeout worker, running on the calling thread");
            return Some(run_blocking(policies, depth, resource, signal, operation));
        }
    };

    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(outcome) => Some(outcome),
        Err(RecvTimeoutError::Timeout) => {
            debug!("Abandoning blocking attempt at the deadline");
            None
        }
        Err(RecvTimeoutError::Disconnected) => match worker.join() {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(()) => None,
        },
    }
}

fn run_non_blocking<'a, 'o, R, T, E>(
    policies: &'a [Policy<E>],
    resource: &'a mut R,
    signal: CancelSignal,
    operation: &'a mut AsyncOperation<'o, R, T, E>,
) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
where
    'o: 'a,
    R: Send,
    T: Send + 'a,
    E: fmt::Display + Send + 'a,
{
    Box::pin(async move {
        let Some((policy, inner)) = policies.split_first() else {
            return operation(resource, signal)
                .await
                .map_err(ResilienceError::Fault);
        };

        match policy {
            Policy::Retry(retry) => {
                let mut retries = 0;
                loop {
                    let attempt =
                        run_non_blocking(inner, &mut *resource, signal.clone(), &mut *operation);
                    let err = match attempt.await {
                        Ok(value) => return Ok(value),
                        Err(err) => err,
                    };

                    let Some(delay) = schedule_retry(retry, retries, &err) else {
                        return Err(err);
                    };
                    retries += 1;

                    if !signal.sleep(delay).await {
                        debug!(retries, "Signal tripped during backoff");
                        return Err(err);
                    }
                }
            }
            Policy::Timeout(timeout) => {
                let deadline = Instant::now() + timeout.duration();
                let child = signal.child_with_deadline(deadline);
                let mut work = run_non_blocking(inner, resource, child.clone(), operation);

                match timeout.strategy() {
                    TimeoutStrategy::Pessimistic => {
                        match tokio::time::timeout_at(deadline, &mut work).await {
                            Ok(outcome) => settle(timeout, deadline, outcome),
                            Err(_) => {
                                // Dropping `work` abandons the in-flight attempt.
                                child.cancel();
                                report_timeout(timeout);
                                Err(timeout.elapsed())
                            }
                        }
                    }
                    TimeoutStrategy::Optimistic => {
                        let early = tokio::select! {
                            biased;
                            outcome = &mut work => Some(outcome),
                            _ = tokio::time::sleep_until(deadline) => None,
                        };

                        match early {
                            Some(outcome) => {
                                if Instant::now() >= deadline {
                                    child.cancel();
                                }
                                settle(timeout, deadline, outcome)
                            }
                            None => {
                                child.cancel();
                                report_timeout(timeout);
                                work.await.map_err(|_| timeout.elapsed())
                            }
                        }
                    }
                }
            }
        }
    })
}
