//! Bulwark Core Resilience: Pure-logic Retry and Timeout policy chains
//!
//! # Overview
//!
//! This crate provides the policy engine used by Bulwark's database
//! decorators. It includes:
//!
//! - **Retry**: Re-runs everything inside it when a handled fault occurs, with a backoff delay
//! - **Timeout**: Bounds the time everything inside it may take, optimistically or pessimistically
//! - **Policy Chain**: An ordered, validated list of policies executed as one unit
//! - **Cancel Signal**: Cooperative cancellation shared between policies and operations
//! - **Execution Context**: Per-call diagnostic metadata handed to the chain
//! - **Shared Resource**: The resource blocking attempts lock, which an abandoned attempt keeps until it returns
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Database drivers or wire protocols
//! - Which provider errors are transient (fault predicates are injected)
//! - Application-specific concerns
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ execute / execute_async
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Policy                      │  ← Handled faults re-run the
//! │  (predicate, max retries, backoff)      │    whole inner chain
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Timeout Policy                    │  ← Child cancel signal with
//! │  (optimistic | pessimistic)             │    a deadline
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         operation(resource, signal)
//! ```
//!
//! # Usage Example
//!
//! ```
//! use bulwark_core_resilience::prelude::*;
//! use futures::FutureExt;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policies = ResiliencePolicies::<std::io::Error>::new(
//!     vec![RetryPolicy::on_fault(|e: &std::io::Error| e.kind() == std::io::ErrorKind::Interrupted)
//!         .max_retries(3)
//!         .into()],
//!     vec![
//!         RetryPolicy::on_fault(|e: &std::io::Error| e.kind() == std::io::ErrorKind::Interrupted)
//!             .or_timeout()
//!             .into(),
//!         TimeoutPolicy::pessimistic(Duration::from_secs(5)).into(),
//!     ],
//! )?;
//!
//! let context = ExecutionContext::build("read_config", "settings.toml");
//! let mut reads = 0u32;
//! let value = policies
//!     .non_blocking()
//!     .execute_async(&context, &CancelSignal::new(), &mut reads, |reads, _signal| {
//!         *reads += 1;
//!         async { Ok::<_, std::io::Error>(42) }.boxed()
//!     })
//!     .await?;
//!
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cancel;
pub mod chain;
pub mod context;
pub mod error;
pub mod policy;
pub mod resource;

// Re-export main types for convenience
pub use backoff::Backoff;
pub use cancel::CancelSignal;
pub use chain::{ExecutionPath, PolicyChain, ResiliencePolicies};
pub use context::ExecutionContext;
pub use error::{ConfigError, ResilienceError};
pub use policy::{
    FaultPredicate, Policy, RetryPolicy, RetryPolicyBuilder, TimeoutPolicy, TimeoutStrategy,
};
pub use resource::SharedResource;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use bulwark_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::backoff::Backoff;
    pub use super::cancel::CancelSignal;
    pub use super::chain::{ExecutionPath, PolicyChain, ResiliencePolicies};
    pub use super::context::ExecutionContext;
    pub use super::error::{ConfigError, ResilienceError};
    pub use super::policy::{
        FaultPredicate, Policy, RetryPolicy, RetryPolicyBuilder, TimeoutPolicy, TimeoutStrategy,
    };
    pub use super::resource::SharedResource;
}
