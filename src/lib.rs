/*!
 * Bulwark - Resilient database connections and commands
 *
 * Drop-in decorators for database primitives with:
 * - Retry policies with predicate-based fault classification and backoff
 * - Optimistic and pessimistic timeout policies
 * - Ordered policy chains, validated once per decorator
 * - Separate blocking and non-blocking execution paths
 * - Structured diagnostics for every decorated call
 * - TOML configuration for policy lists
 */

pub mod command;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use command::ResilientCommand;
pub use config::{
    BackoffConfig, FaultFilter, LogFormat, LogLevel, LoggingConfig, PolicyConfig, ResilienceConfig,
    StrategyConfig,
};
pub use connection::ResilientConnection;
pub use context::{CommandMetadata, ConnectionMetadata};
pub use error::{BulwarkError, Result};

pub use bulwark_core_interface as interface;
pub use bulwark_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
