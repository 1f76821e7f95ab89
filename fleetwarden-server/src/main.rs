//! Fleetwarden Server - Headless Daemon
//!
//! A pure Rust daemon that keeps a fleet of messaging-account
//! connections healthy: circuit breaking, adaptive rate limiting, proxy
//! rotation, distributed backfill scheduling, and a durable telemetry
//! pipeline, with a REST API for operators and the transport connector.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod cli;
mod config;
mod connector;
mod state;

#[cfg(test)]
mod test_helpers;

use cli::Cli;
use config::ServerConfig;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let instance_id = cli::resolve_instance_id(&cli);
    info!(instance_id = %instance_id, "Fleetwarden server starting");

    let config = ServerConfig::load(cli.config.as_deref())?;
    let state = AppState::build(&config, instance_id)?;

    info!(
        accounts = config.accounts.len(),
        proxies = config.proxies.len(),
        "Application state initialized"
    );

    state.start_background_loops();

    let app = api::build_router(state);
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Operator API listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
