use anyhow::Context;
use clap::Parser;
use clawd_app::{heartbeat, routes, AppState, DaemonConfig};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "clawd", version, about = "Personal agent daemon: agent hub and lane scheduler")]
struct Cli {
    /// YAML config file (falls back to $CLAWD_CONFIG, then defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file and $CLAWD_BIND
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config =
        DaemonConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    config.validate().context("Invalid configuration")?;
    let addr = config.bind_addr()?;

    let state = AppState::build(&config)?;
    let heartbeat = config
        .heartbeat
        .enabled
        .then(|| heartbeat::spawn(state.clone(), config.heartbeat.clone()));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "clawd listening");

    axum::serve(listener, routes::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    state.shutdown();
    if let Some(handle) = heartbeat {
        let _ = handle.await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
