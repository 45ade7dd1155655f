//! Error types for the resilience engine

use crate::chain::ExecutionPath;
use crate::policy::TimeoutStrategy;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while composing policies into a chain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required policy list was empty (or missing from configuration)
    #[error("The {path} policy list must contain at least one policy")]
    EmptyPolicyList { path: ExecutionPath },

    /// A policy carries parameters that can never work
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Failure surfaced by a policy chain
///
/// Whether a fault was transient or terminal is decided by each retry
/// policy's predicate; the chain always hands back the last fault it saw.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResilienceError<E> {
    /// The operation's own fault, unchanged
    #[error("{0}")]
    Fault(E),

    /// A timeout policy's deadline elapsed before the operation finished
    #[error("Operation timed out after {timeout:?} ({strategy} timeout)")]
    Timeout {
        timeout: Duration,
        strategy: TimeoutStrategy,
    },
}

impl<E> ResilienceError<E> {
    /// Check if this error was raised by a timeout policy
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout { .. })
    }

    /// Borrow the operation's fault, if this is one
    pub fn fault(&self) -> Option<&E> {
        match self {
            ResilienceError::Fault(e) => Some(e),
            ResilienceError::Timeout { .. } => None,
        }
    }

    /// Take the operation's fault, if this is one
    pub fn into_fault(self) -> Option<E> {
        match self {
            ResilienceError::Fault(e) => Some(e),
            ResilienceError::Timeout { .. } => None,
        }
    }
}
