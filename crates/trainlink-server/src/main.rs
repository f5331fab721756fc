//! TrainLink server binary: wires the links, the store, the dispatcher and
//! the sync service together and runs until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trainlink_core::protocol::pdi::{self, PdiMessage};
use trainlink_core::FrameSource;

use trainlink_server::config::ServerConfig;
use trainlink_server::discovery::DiscoveryResponder;
use trainlink_server::dispatch::Dispatcher;
use trainlink_server::mux::{self, MuxConfig};
use trainlink_server::state::StateStore;
use trainlink_server::sync::SyncServer;
use trainlink_server::transport::base3::Base3Adapter;
use trainlink_server::transport::serial::SerialAdapter;
use trainlink_server::transport::FrameTransport;
use trainlink_server::ingest;

#[derive(Parser, Debug)]
#[command(name = "trainlink-server", about = "TMCC/Legacy layout bridge server")]
struct Args {
    /// Path to the config file.
    #[arg(long, env = "TRAINLINK_CONFIG", default_value = "trainlink.toml")]
    config: PathBuf,

    /// Override the serial device path.
    #[arg(long, env = "TRAINLINK_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Override the serial baud rate.
    #[arg(long, env = "TRAINLINK_BAUD_RATE")]
    baud_rate: Option<u32>,

    /// Override the Base 3 address as host:port (implies the link is on).
    #[arg(long, env = "TRAINLINK_BASE3")]
    base3: Option<String>,

    /// Override the sync listen port.
    #[arg(long, env = "TRAINLINK_SYNC_PORT")]
    sync_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, &args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    info!("trainlink-server {} starting", env!("CARGO_PKG_VERSION"));
    if args.config.exists() {
        info!("config loaded from {}", args.config.display());
    } else {
        info!("config {} not found, using defaults", args.config.display());
    }

    let running = Arc::new(AtomicBool::new(true));

    // Physical links.
    let mut transports: Vec<Box<dyn FrameTransport>> = Vec::new();
    if config.links.serial_enabled {
        let serial = SerialAdapter::new(config.links.serial_port.clone(), config.links.baud_rate)?;
        transports.push(Box::new(serial));
    }
    if config.links.base3_enabled {
        let addr: SocketAddr = format!("{}:{}", config.links.base3_host, config.links.base3_port)
            .parse()
            .context("invalid Base 3 address")?;
        transports.push(Box::new(Base3Adapter::new(addr)));
    }
    if transports.is_empty() {
        warn!("no links enabled; serving state only");
    }

    let (mux_handle, inbound) = mux::start(transports, MuxConfig::default(), running.clone());

    // State and command paths.
    let store = StateStore::new();
    ingest::start(inbound, store.clone());
    let dispatcher = Dispatcher::start(mux_handle.clone(), store.clone());

    // Ask the Base 3 for its roster so mirrors start with named devices.
    if mux_handle.has_source(FrameSource::Base3) {
        if let Err(e) = mux_handle
            .send_to(FrameSource::Base3, pdi::encode(&PdiMessage::AllGet))
            .await
        {
            warn!("roster bootstrap request failed: {e}");
        }
    }

    // Client-facing services.
    let bind_addr: SocketAddr = format!("{}:{}", config.sync.bind_address, config.sync.sync_port)
        .parse()
        .context("invalid sync bind address")?;
    let _sync = SyncServer::start(
        bind_addr,
        config.sync.max_clients,
        store.clone(),
        dispatcher.clone(),
        running.clone(),
    )
    .await
    .context("starting sync server")?;

    let discovery = DiscoveryResponder::start(
        config.sync.discovery_port,
        config.sync.sync_port,
        config.server.name.clone(),
        running.clone(),
    )
    .context("starting discovery responder")?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    running.store(false, Ordering::Relaxed);
    discovery.stop();

    Ok(())
}

fn apply_overrides(config: &mut ServerConfig, args: &Args) -> Result<()> {
    if let Some(port) = &args.serial_port {
        config.links.serial_port = port.clone();
    }
    if let Some(baud) = args.baud_rate {
        config.links.baud_rate = baud;
    }
    if let Some(base3) = &args.base3 {
        let addr: SocketAddr = base3
            .parse()
            .with_context(|| format!("invalid --base3 address {base3}"))?;
        config.links.base3_enabled = true;
        config.links.base3_host = addr.ip().to_string();
        config.links.base3_port = addr.port();
    }
    if let Some(port) = args.sync_port {
        config.sync.sync_port = port;
    }
    Ok(())
}
