use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use codex_watchdog::{Configuration, ScriptSet, Watchdog};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Mirror local changes to remotes by running sync scripts.
#[derive(Debug, Parser)]
#[command(name = "watchdog", version)]
struct Cli {
    /// Directory holding configuration.yaml and the bulk_sync, copy and
    /// delete scripts.
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // Scripts are resolved from here after we change directory.
    let config_dir = std::fs::canonicalize(&cli.config_dir)
        .with_context(|| format!("cannot resolve {}", cli.config_dir.display()))?;
    let config = Configuration::load(&config_dir)?;
    let scripts = ScriptSet::in_dir(&config_dir);
    scripts.verify()?;

    std::env::set_current_dir(&config.current_dir)
        .with_context(|| format!("cannot change directory to {}", config.current_dir.display()))?;

    let shutdown = shutdown_signal().context("cannot install signal handler")?;
    let watchdog = Watchdog::start(&config, scripts).context("cannot start watching")?;
    info!(
        "Watchdog running in {} with {} tree(s)",
        config.current_dir.display(),
        watchdog.trees()
    );

    shutdown.await;
    watchdog.stop().await;
    info!("Exiting gracefully.");
    Ok(())
}

/// Resolves once SIGTERM (or Ctrl-C) arrives. Handlers are installed eagerly.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = term.recv() => info!("Received TERM"),
            _ = int.recv() => info!("Received INT"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
        }
    })
}
