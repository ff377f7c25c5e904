use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ndlsr::config::RouterConfig;
use ndlsr::engine::RoutingEngine;
use ndlsr::fib::LogForwardingPlane;
use ndlsr::sync::{new_lsa_store, UdpSync};

#[derive(Parser)]
#[command(name = "ndlsr", about = "Link-state routing daemon for named-data networks")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "ndlsr.conf.json")]
    config: PathBuf,

    /// Log filter when RUST_LOG is unset, e.g. "info" or "ndlsr=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
        )
        .init();

    let config = RouterConfig::load(&cli.config)?;
    info!("starting ndlsr as {}", config.router_name);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let store = new_lsa_store();
    let sync = UdpSync::bind(&config, store.clone()).await?;
    sync.start(event_tx.clone());

    let engine = RoutingEngine::new(
        config,
        sync.clone(),
        sync.clone(),
        sync.clone(),
        Arc::new(LogForwardingPlane),
        store,
        event_tx,
        event_rx,
    )?;
    engine.run().await
}
