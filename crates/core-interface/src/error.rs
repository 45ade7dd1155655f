//! Errors raised by database primitives

use crate::ConnectionState;
use bulwark_core_resilience::ResilienceError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a connection, command, transaction or reader
///
/// Decorated primitives report the same type: a policy chain hands faults
/// back unchanged and adds [`DbError::PolicyTimeout`] for deadlines it
/// enforced itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Server error {code}: {message}")]
    Server { code: i32, message: String },

    /// The driver's own command timeout fired
    #[error("Command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// A resilience timeout policy gave up on the operation
    #[error("Resilience timeout elapsed after {timeout:?}")]
    PolicyTimeout { timeout: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Connection is not open (state: {0})")]
    NotOpen(ConnectionState),
}

impl DbError {
    /// Server error number, if the server reported one
    pub fn code(&self) -> Option<i32> {
        match self {
            DbError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error is a driver or policy timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DbError::CommandTimeout(_) | DbError::PolicyTimeout { .. }
        )
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }
}

impl From<ResilienceError<DbError>> for DbError {
    fn from(err: ResilienceError<DbError>) -> Self {
        match err {
            ResilienceError::Fault(e) => e,
            ResilienceError::Timeout { timeout, .. } => DbError::PolicyTimeout { timeout },
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
