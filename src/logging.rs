/*!
 * Log output for the CLI and for applications embedding the decorators
 *
 * The policy engine reports retry decisions and elapsed timeouts at `warn`
 * and chain executions at `debug`. The default filter admits every bulwark
 * crate at the configured level; `RUST_LOG` replaces it entirely.
 */

use std::fs::File;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BulwarkError, Result};

/// Crates whose events the default filter admits
const TARGETS: [&str; 3] = ["bulwark", "bulwark_core_resilience", "bulwark_core_interface"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Directive used when `RUST_LOG` is not set
pub fn default_directive(config: &LoggingConfig) -> String {
    let level = if config.verbose {
        Level::DEBUG
    } else {
        config.level.to_tracing_level()
    };
    let level = level.as_str().to_lowercase();

    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(config)))
        .map_err(|e| BulwarkError::Config(format!("Invalid log filter: {e}")))
}

/// Where events are written and how they are rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSink {
    /// `None` writes to stderr, leaving stdout to command output
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl LogSink {
    pub fn from_config(config: &LoggingConfig) -> Self {
        let fallback = match config.file {
            Some(_) => LogFormat::Json,
            None => LogFormat::Compact,
        };

        Self {
            file: config.file.clone(),
            format: config.format.unwrap_or(fallback),
        }
    }

    fn layer(&self) -> Result<BoxedLayer> {
        let Some(path) = &self.file else {
            return Ok(formatted(fmt::layer().with_writer(std::io::stderr), self.format));
        };

        let file = File::create(path).map_err(|e| {
            BulwarkError::Config(format!("Failed to create log file {}: {e}", path.display()))
        })?;
        let layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE);

        Ok(formatted(layer, self.format))
    }
}

fn formatted<W>(
    layer: fmt::Layer<Registry, fmt::format::DefaultFields, fmt::format::Format, W>,
    format: LogFormat,
) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber described by `config`
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let layer = LogSink::from_config(config).layer()?;

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| BulwarkError::Config(format!("Failed to install subscriber: {e}")))
}
