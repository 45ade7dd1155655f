/*!
 * Error types for Bulwark
 */

use bulwark_core_resilience::ConfigError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BulwarkError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

/// Errors raised while setting up decorators
///
/// Failures of decorated database calls are reported as
/// [`bulwark_core_interface::DbError`], exactly as the native driver would
/// report them.
#[derive(Debug, Error)]
pub enum BulwarkError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Policy lists failed validation
    #[error("Policy error: {0}")]
    Policy(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl BulwarkError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_config_error() {
            EXIT_CONFIG
        } else {
            EXIT_FAILURE
        }
    }

    /// Check if this error came from the configuration surface
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BulwarkError::Config(_) | BulwarkError::Policy(_) | BulwarkError::Parse(_)
        )
    }
}
