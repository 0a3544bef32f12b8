//! ferricd - Ferric IRC Daemon.
//!
//! A federated TS6 ircd core: the network state engine, command
//! dispatcher, and server-to-server synchronization machinery.

mod bancache;
mod bandb;
mod burst;
mod chmode;
mod config;
mod dispatch;
mod engine;
mod error;
mod flood;
mod handlers;
mod helper;
mod hooks;
mod net;
mod ratelimit;
mod route;
mod splitmode;
mod state;
#[cfg(test)]
mod tests;
mod ts6;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::Config;
use crate::engine::{Engine, Shutdown};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path; defaults to
/// `ferricd.toml`. Canonicalized so REHASH survives a cwd change.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);
    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {flag}");
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "ferricd.toml".to_string(),
    };
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {config_path}: {e}");
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.serverinfo.log_format {
        config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        anyhow::bail!("configuration validation failed with {} error(s)", errors.len());
    }

    info!(
        server = %config.serverinfo.name,
        sid = %config.serverinfo.sid,
        network = %config.serverinfo.network_name,
        "starting ferricd"
    );

    let config = Arc::new(config);
    let (events_tx, events_rx) = mpsc::channel(4096);

    net::start_listeners(&config.listeners, events_tx.clone(), config.general.sendq_max).await?;

    let mut engine = Engine::new(Arc::clone(&config), config_path, events_tx.clone());
    engine.start_helpers();

    // shutdown signals feed the same event channel closure path
    {
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received, shutting down"),
                _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            }
            drop(events_tx);
            std::process::exit(0);
        });
    }

    match engine.run(events_rx).await {
        Shutdown::Die => {
            info!("shutdown complete");
            Ok(())
        }
        Shutdown::Restart => {
            info!("restarting");
            use std::os::unix::process::CommandExt;
            let exe = std::env::current_exe()?;
            let err = std::process::Command::new(exe)
                .args(std::env::args().skip(1))
                .exec();
            Err(err.into())
        }
    }
}
