mod backend;
mod cli;
mod config;
mod meta;
mod protocol;
mod registry;
mod server;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::GatewayConfig::load(path)?,
        None => config::GatewayConfig::default(),
    };
    cli.apply(&mut config);

    // Log to stderr so anything piping stdout stays clean.
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    if config.backends.is_empty() {
        warn!("no backends configured");
    }

    let registry = Arc::new(registry::Registry::from_config(&config));

    info!(
        host = %config.host,
        port = config.port,
        backends = registry.len(),
        "mcp-gateway starting"
    );
    if config.enable_meta_mcp {
        info!(
            endpoint = %format!("http://{}:{}/mcp", config.host, config.port),
            "meta facade enabled"
        );
    }
    for name in registry.names() {
        info!(backend = %name, route = %format!("/mcp/{name}"), "direct backend route");
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());

    // Hibernate idle backends in the background.
    tokio::spawn(Arc::clone(&registry).run_idle_checker(Arc::clone(&shutdown)));

    // SIGINT/SIGTERM trigger orderly shutdown.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
            shutdown.notify_waiters();
        });
    }
    #[cfg(not(unix))]
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received ctrl-c");
            }
            shutdown.notify_waiters();
        });
    }

    let state = server::AppState {
        registry: Arc::clone(&registry),
        enable_meta_mcp: config.enable_meta_mcp,
    };
    server::serve(state, &config.host, config.port, Arc::clone(&shutdown)).await?;

    info!("shutting down");
    shutdown.notify_waiters();
    registry.stop_all().await;

    Ok(())
}
