/*!
 * Configuration for resilient decorators
 *
 * Policy lists are declared in TOML, outermost policy first, one list per
 * execution path:
 *
 * ```toml
 * [[blocking]]
 * kind = "retry"
 * max_retries = 3
 * backoff = { kind = "constant", delay_ms = 1000 }
 *
 * [[blocking]]
 * kind = "timeout"
 * duration_ms = 30000
 * strategy = "optimistic"
 * ```
 */

use bulwark_core_interface::DbError;
use bulwark_core_resilience::{
    Backoff, FaultPredicate, Policy, ResilienceError, ResiliencePolicies, RetryPolicy,
    TimeoutPolicy, TimeoutStrategy,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Server error numbers commonly worth retrying (deadlocks, throttling,
/// failover, transport resets)
pub const DEFAULT_TRANSIENT_CODES: &[i32] = &[
    -2, 233, 1205, 4060, 10053, 10054, 10060, 10928, 10929, 40197, 40501, 40613, 49918,
    49919, 49920,
];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Policies for blocking calls, outermost first
    #[serde(default)]
    pub blocking: Vec<PolicyConfig>,

    /// Policies for non-blocking calls, outermost first
    #[serde(default)]
    pub non_blocking: Vec<PolicyConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            blocking: vec![
                PolicyConfig::default_retry(),
                PolicyConfig::Timeout {
                    duration_ms: 30_000,
                    strategy: StrategyConfig::Optimistic,
                },
            ],
            non_blocking: vec![
                PolicyConfig::default_retry(),
                PolicyConfig::Timeout {
                    duration_ms: 30_000,
                    strategy: StrategyConfig::Pessimistic,
                },
            ],
        }
    }
}

impl ResilienceConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Build and validate both policy chains
    ///
    /// A missing or empty list is rejected here, before any decorator exists.
    pub fn build_policies(&self) -> Result<ResiliencePolicies<DbError>> {
        let blocking = self.blocking.iter().map(PolicyConfig::to_policy);
        let non_blocking = self.non_blocking.iter().map(PolicyConfig::to_policy);
        Ok(ResiliencePolicies::new(blocking, non_blocking)?)
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Output format; json for files and compact for stderr when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Event formatting for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One line per event
    Compact,
    /// Multi-line, human oriented
    Pretty,
    /// One JSON object per event
    Json,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// One policy in a configured list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicyConfig {
    Retry {
        #[serde(default = "default_max_retries")]
        max_retries: u32,

        #[serde(default)]
        backoff: BackoffConfig,

        /// Which failures are retried
        #[serde(default)]
        retry_on: FaultFilter,
    },
    Timeout {
        duration_ms: u64,

        #[serde(default)]
        strategy: StrategyConfig,
    },
}

impl PolicyConfig {
    fn default_retry() -> Self {
        PolicyConfig::Retry {
            max_retries: default_max_retries(),
            backoff: BackoffConfig::default(),
            retry_on: FaultFilter::default(),
        }
    }

    /// Build the runtime policy
    pub fn to_policy(&self) -> Policy<DbError> {
        match self {
            PolicyConfig::Retry {
                max_retries,
                backoff,
                retry_on,
            } => {
                let filter = retry_on.clone();
                RetryPolicy::handle(FaultPredicate::<DbError>::new(move |err| filter.matches(err)))
                    .max_retries(*max_retries)
                    .backoff(backoff.to_backoff())
                    .into()
            }
            PolicyConfig::Timeout {
                duration_ms,
                strategy,
            } => TimeoutPolicy::new(Duration::from_millis(*duration_ms), (*strategy).into()).into(),
        }
    }
}

/// Delay schedule between retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffConfig {
    /// Retry immediately
    None,
    Constant {
        delay_ms: u64,
        #[serde(default)]
        jitter: f64,
    },
    Exponential {
        initial_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        max_ms: u64,
        #[serde(default)]
        jitter: f64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            initial_ms: 200,
            multiplier: default_multiplier(),
            max_ms: 5_000,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn to_backoff(&self) -> Backoff {
        match self {
            BackoffConfig::None => Backoff::none(),
            BackoffConfig::Constant { delay_ms, jitter } => {
                Backoff::constant(Duration::from_millis(*delay_ms)).with_jitter(*jitter)
            }
            BackoffConfig::Exponential {
                initial_ms,
                multiplier,
                max_ms,
                jitter,
            } => Backoff::exponential(
                Duration::from_millis(*initial_ms),
                *multiplier,
                Duration::from_millis(*max_ms),
            )
            .with_jitter(*jitter),
        }
    }
}

/// Timeout strategy as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyConfig {
    #[default]
    Optimistic,
    Pessimistic,
}

impl From<StrategyConfig> for TimeoutStrategy {
    fn from(strategy: StrategyConfig) -> Self {
        match strategy {
            StrategyConfig::Optimistic => TimeoutStrategy::Optimistic,
            StrategyConfig::Pessimistic => TimeoutStrategy::Pessimistic,
        }
    }
}

/// Declarative fault classification for retry policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultFilter {
    /// Server error numbers to retry
    pub codes: Vec<i32>,

    /// Retry failures to reach the server
    pub connection_failures: bool,

    /// Retry the driver's own command timeouts
    pub command_timeouts: bool,

    /// Retry timeouts raised by inner timeout policies
    pub policy_timeouts: bool,
}

impl Default for FaultFilter {
    fn default() -> Self {
        Self {
            codes: DEFAULT_TRANSIENT_CODES.to_vec(),
            connection_failures: true,
            command_timeouts: true,
            policy_timeouts: true,
        }
    }
}

impl FaultFilter {
    /// Check whether a chain failure should be retried
    pub fn matches(&self, err: &ResilienceError<DbError>) -> bool {
        match err {
            ResilienceError::Timeout { .. } => self.policy_timeouts,
            ResilienceError::Fault(fault) => match fault {
                DbError::Server { code, .. } => self.codes.contains(code),
                DbError::Connection(_) => self.connection_failures,
                DbError::CommandTimeout(_) => self.command_timeouts,
                DbError::PolicyTimeout { .. } => self.policy_timeouts,
                DbError::Cancelled | DbError::InvalidOperation(_) | DbError::NotOpen(_) => false,
            },
        }
    }
}

// Default value functions for serde
fn default_max_retries() -> u32 {
    3
}

fn default_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core_resilience::{ConfigError, ExecutionPath};
    use crate::error::BulwarkError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[[blocking]]
kind = "retry"
max_retries = 5
backoff = { kind = "exponential", initial_ms = 200, multiplier = 2.0, max_ms = 5000, jitter = 0.1 }
retry_on = { codes = [1205], connection_failures = true }

[[blocking]]
kind = "timeout"
duration_ms = 30000
strategy = "optimistic"

[[non_blocking]]
kind = "retry"
backoff = { kind = "constant", delay_ms = 1000 }

[[non_blocking]]
kind = "timeout"
duration_ms = 5000
strategy = "pessimistic"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = ResilienceConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.blocking.len(), 2);
        assert_eq!(
            config.non_blocking[0],
            PolicyConfig::Retry {
                max_retries: 3,
                backoff: BackoffConfig::Constant {
                    delay_ms: 1000,
                    jitter: 0.0
                },
                retry_on: FaultFilter::default(),
            }
        );
        assert_eq!(
            config.non_blocking[1],
            PolicyConfig::Timeout {
                duration_ms: 5000,
                strategy: StrategyConfig::Pessimistic
            }
        );

        let PolicyConfig::Retry { retry_on, .. } = &config.blocking[0] else {
            panic!("expected retry policy");
        };
        assert_eq!(retry_on.codes, vec![1205]);
        // Unset switches keep their defaults
        assert!(retry_on.command_timeouts);
    }

    #[test]
    fn test_build_policies_preserves_order() {
        let policies = ResilienceConfig::from_toml_str(SAMPLE)
            .unwrap()
            .build_policies()
            .unwrap();

        let kinds: Vec<_> = policies
            .non_blocking()
            .policies()
            .iter()
            .map(|p| p.kind())
            .collect();
        assert_eq!(kinds, vec!["retry", "timeout"]);
        assert_eq!(policies.blocking().path(), ExecutionPath::Blocking);
    }

    #[test]
    fn test_missing_list_is_rejected() {
        let config = ResilienceConfig::from_toml_str(
            r#"
[[blocking]]
kind = "timeout"
duration_ms = 1000
"#,
        )
        .unwrap();
        assert!(config.non_blocking.is_empty());

        let err = config.build_policies().unwrap_err();
        assert!(matches!(
            err,
            BulwarkError::Policy(ConfigError::EmptyPolicyList {
                path: ExecutionPath::NonBlocking
            })
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut config = ResilienceConfig::default();
        config.blocking.push(PolicyConfig::Timeout {
            duration_ms: 0,
            strategy: StrategyConfig::Optimistic,
        });

        assert!(matches!(
            config.build_policies(),
            Err(BulwarkError::Policy(ConfigError::InvalidPolicy(_)))
        ));
    }

    #[test]
    fn test_unknown_policy_kind_fails_to_parse() {
        let err = ResilienceConfig::from_toml_str(
            r#"
[[blocking]]
kind = "bulkhead"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, BulwarkError::Parse(_)));
    }

    #[test]
    fn test_default_config_builds() {
        let policies = ResilienceConfig::default().build_policies().unwrap();
        assert_eq!(policies.blocking().policies().len(), 2);
        assert_eq!(policies.non_blocking().policies().len(), 2);
    }

    #[test]
    fn test_fault_filter_classification() {
        let filter = FaultFilter {
            codes: vec![1205],
            connection_failures: true,
            command_timeouts: false,
            policy_timeouts: false,
        };

        let deadlock = DbError::Server {
            code: 1205,
            message: "deadlock".into(),
        };
        let syntax = DbError::Server {
            code: 102,
            message: "syntax".into(),
        };
        assert!(filter.matches(&ResilienceError::Fault(deadlock)));
        assert!(!filter.matches(&ResilienceError::Fault(syntax)));
        assert!(filter.matches(&ResilienceError::Fault(DbError::Connection("reset".into()))));
        assert!(!filter.matches(&ResilienceError::Fault(DbError::CommandTimeout(
            Duration::from_secs(30)
        ))));
        assert!(!filter.matches(&TimeoutPolicy::optimistic(Duration::from_secs(1)).elapsed()));
        assert!(!filter.matches(&ResilienceError::Fault(DbError::Cancelled)));
    }

    #[test]
    fn test_backoff_config_conversion() {
        let backoff = BackoffConfig::Exponential {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 1000,
            jitter: 0.0,
        }
        .to_backoff();
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(BackoffConfig::None.to_backoff().delay(1), Duration::ZERO);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ResilienceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.blocking.len(), 2);

        let missing = ResilienceConfig::from_file(Path::new("/nonexistent/bulwark.toml"));
        assert!(matches!(missing, Err(BulwarkError::Io(_))));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = ResilienceConfig::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ResilienceConfig::from_toml_str(&text).unwrap(), config);
    }
}
