//! TrainLink mirror client binary: finds a server, mirrors its roster and
//! prints every change until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trainlink_client::{locate, ClientConfig, ClientEvent, MirrorEvent, SyncClient};

#[derive(Parser, Debug)]
#[command(name = "trainlink-client", about = "TrainLink roster mirror")]
struct Args {
    /// Path to the config file.
    #[arg(long, env = "TRAINLINK_CONFIG", default_value = "trainlink-client.toml")]
    config: PathBuf,

    /// Server address as host:port; skips discovery.
    #[arg(long, env = "TRAINLINK_SERVER")]
    server: Option<String>,

    /// Name reported to the server.
    #[arg(long, env = "TRAINLINK_CLIENT_NAME")]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ClientConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(name) = args.name {
        config.client_name = name;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    if !args.config.exists() {
        info!("config {} not found, using defaults", args.config.display());
    }

    let addr = resolve_server(&args.server, &config)?;
    info!("mirroring {addr}");

    let running = Arc::new(AtomicBool::new(true));
    let (client, mut events) = SyncClient::connect(addr, config.client_name.clone(), running);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ClientEvent::Connected) => info!("connected, syncing"),
                    Some(ClientEvent::SyncLost) => info!("connection lost, reconnecting"),
                    Some(ClientEvent::Mirror(MirrorEvent::SnapshotComplete { devices, .. })) => {
                        info!("in sync: {devices} devices");
                    }
                    Some(ClientEvent::Mirror(MirrorEvent::DeviceChanged(device))) => {
                        info!("{}: {:?}", device.key, device.state);
                    }
                    Some(ClientEvent::Mirror(MirrorEvent::CommandRejected { description })) => {
                        info!("command rejected: {description}");
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                client.shutdown();
                break;
            }
        }
    }

    Ok(())
}

/// Explicit --server wins, then the config file, then discovery.
fn resolve_server(flag: &Option<String>, config: &ClientConfig) -> Result<SocketAddr> {
    if let Some(server) = flag {
        return server
            .parse()
            .with_context(|| format!("invalid --server address {server}"));
    }
    if !config.server_host.is_empty() {
        return format!("{}:{}", config.server_host, config.server_port)
            .parse()
            .context("invalid server address in config");
    }

    info!("no server configured, broadcasting discovery");
    let found = locate(config.discovery_port, Duration::from_secs(2))
        .context("discovery broadcast failed")?;
    match found.first() {
        Some(server) => {
            info!("discovered {} at {}", server.name, server.addr);
            Ok(server.addr)
        }
        None => bail!("no server found; pass --server host:port"),
    }
}
