/*!
 * Bulwark CLI - policy configuration tooling
 */

use bulwark::{
    error::{Result, EXIT_SUCCESS},
    logging, LogLevel, ResilienceConfig,
};
use bulwark_core_resilience::{Policy, PolicyChain};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(version, about = "Validate and generate resilience policy configuration", long_about = None)]
struct Cli {
    /// Log level (overrides the config file)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a configuration file, build both policy chains and print them
    Check {
        /// Path to the TOML configuration
        #[arg(value_name = "FILE")]
        config: PathBuf,
    },

    /// Print the default configuration as TOML
    Init,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { ref config } => {
            let mut loaded = ResilienceConfig::from_file(config)?;
            if let Some(level) = cli.log_level {
                loaded.logging.level = level.into();
            }
            loaded.logging.verbose |= cli.verbose;
            logging::init_logging(&loaded.logging)?;

            let policies = loaded.build_policies()?;
            info!(config = %config.display(), "Policy configuration is valid");

            print_chain(policies.blocking());
            print_chain(policies.non_blocking());
            Ok(())
        }
        Commands::Init => {
            let text = toml::to_string_pretty(&ResilienceConfig::default())
                .map_err(|e| bulwark::BulwarkError::Config(e.to_string()))?;
            print!("{text}");
            Ok(())
        }
    }
}

fn print_chain<E>(chain: &PolicyChain<E>) {
    println!("{} ({} policies, outermost first):", chain.path(), chain.policies().len());
    for (depth, policy) in chain.policies().iter().enumerate() {
        let indent = "  ".repeat(depth + 1);
        match policy {
            Policy::Retry(retry) => println!(
                "{indent}retry: max_retries={} backoff={:?}",
                retry.max_retries(),
                retry.backoff()
            ),
            Policy::Timeout(timeout) => println!(
                "{indent}timeout: {:?} ({})",
                timeout.duration(),
                timeout.strategy()
            ),
        }
    }
}
