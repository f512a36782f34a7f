use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use vault_unseal::config;
use vault_unseal::daemon::Daemon;
use vault_unseal::error::{Error, UnsealErrorTrait};

#[derive(Parser)]
#[command(
    name = "vault-unseal",
    version,
    about = "Automatically unseal Vault cluster members using configured unseal shares",
    long_about = None
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "CONFIG_PATH", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debugging (extra logging)
    #[arg(short = 'D', long)]
    debug: bool,

    /// Logging level (ignored when RUST_LOG is set)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Also append logs to this file
    #[arg(long, env = "LOG_PATH", value_name = "PATH")]
    log_path: Option<PathBuf>,

    /// Disable logging to stdout
    #[arg(long, env = "LOG_QUIET")]
    log_quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli)?;

    let config = config::load(cli.config.as_deref())
        .map_err(|e| startup_failed(e.into()))
        .context("failed to load configuration")?;
    tracing::debug!(config = ?config, "loaded configuration");

    let mut daemon = Daemon::new(config);
    if let Some(path) = &cli.config {
        daemon = daemon.with_config_path(path);
    }
    daemon.run(shutdown_signal()).await.map_err(startup_failed)?;

    Ok(())
}

fn startup_failed(err: Error) -> anyhow::Error {
    tracing::error!(category = %err.category(), error = %err, "startup failed");
    err.into()
}

fn setup_tracing(cli: &Cli) -> Result<()> {
    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("vault_unseal={level},warn")))
        .context("invalid log level")?;

    let mut layers: Vec<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>> = Vec::new();

    if !cli.log_quiet {
        let stdout = tracing_subscriber::fmt::layer().with_target(false);
        layers.push(match cli.log_format {
            LogFormat::Text => stdout.boxed(),
            LogFormat::Pretty => stdout.pretty().boxed(),
            LogFormat::Json => stdout.json().boxed(),
        });
    }

    if let Some(path) = &cli.log_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;

        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .json()
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(())
}

/// Resolves on SIGINT, SIGTERM or SIGQUIT (ctrl-c elsewhere)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let signals = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        );
        match signals {
            (Ok(mut sigint), Ok(mut sigterm), Ok(mut sigquit)) => {
                tokio::select! {
                    _ = sigint.recv() => tracing::warn!("SIGINT received"),
                    _ = sigterm.recv() => tracing::warn!("SIGTERM received"),
                    _ = sigquit.recv() => tracing::warn!("SIGQUIT received"),
                }
                return;
            }
            _ => tracing::warn!("unable to install signal handlers, falling back to ctrl-c"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
