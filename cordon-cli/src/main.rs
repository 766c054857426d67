mod commands;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cordon_sandbox::{Backend, EngineConfig, NetworkMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "cordon")]
#[command(about = "Run commands under gVisor, nsjail or Docker isolation")]
#[command(version)]
pub struct Cli {
    /// Engine config file (defaults to $CORDON_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe which sandbox runtimes work on this host (default)
    Detect {
        /// Print the runtimes as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a command inside a sandbox
    Run(RunArgs),
    /// Print the nsjail policy generated for a profile
    Policy {
        /// Profile from the engine config
        #[arg(short, long)]
        profile: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Backend to use instead of the strongest available one
    #[arg(short, long)]
    pub backend: Option<Backend>,

    /// Profile from the engine config
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Permit running without isolation
    #[arg(long)]
    pub allow_unsandboxed: bool,

    /// Memory limit such as 256Mi or 1Gi
    #[arg(long)]
    pub memory: Option<String>,

    /// Fractional CPU cores
    #[arg(long)]
    pub cpu: Option<f64>,

    /// Wall-clock limit such as 500ms or 10s
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Byte cap for stdout and stderr, each
    #[arg(long)]
    pub max_output: Option<usize>,

    /// Network access: none, host or restricted
    #[arg(long, value_parser = parse_network)]
    pub network: Option<NetworkMode>,

    /// Allow writes to the sandbox filesystem
    #[arg(long)]
    pub writable: bool,

    /// Working directory inside the sandbox
    #[arg(short = 'w', long)]
    pub workdir: Option<PathBuf>,

    /// Environment variable for the command, KEY=VALUE (repeatable)
    #[arg(short, long, value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// File whose contents are written to the command's stdin
    #[arg(long)]
    pub stdin_file: Option<PathBuf>,

    /// Print the full execution result as JSON
    #[arg(long)]
    pub json: bool,

    /// Command and arguments, after `--`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn parse_network(value: &str) -> Result<NetworkMode, String> {
    match value {
        "none" => Ok(NetworkMode::None),
        "host" => Ok(NetworkMode::Host),
        "restricted" => Ok(NetworkMode::Restricted),
        other => Err(format!("unknown network mode '{}'", other)),
    }
}

fn parse_env(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", value)),
    }
}

/// Console logging plus an optional non-blocking file mirror.
///
/// `RUST_LOG` wins over `--verbose` when set.
fn init_tracing(verbose: bool, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("cordon={},cordon_sandbox={}", log_level, log_level))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_file.as_ref())?;

    let engine = EngineConfig::load(cli.config.as_deref()).context("Failed to load engine config")?;

    match cli.command {
        Some(Commands::Detect { json }) => commands::detect(&engine, json).await,
        Some(Commands::Run(args)) => {
            let code = commands::run(&engine, args).await?;
            if code != 0 {
                // Flush the file writer before exiting
                drop(_guard);
                std::process::exit(code);
            }
            Ok(())
        }
        Some(Commands::Policy { profile }) => commands::policy(&engine, profile.as_deref()),
        None => commands::detect(&engine, false).await,
    }
}
