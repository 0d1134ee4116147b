//! gridx-node — the GridX coordination-plane binary.
//!
//! Startup sequence:
//!   1. Load and validate configuration (file + CLI overrides)
//!   2. Open the durable store and rebuild derived indexes
//!   3. Construct the service graph (registry, escrow, chains, scheduler, P2P)
//!   4. Register this node's own record
//!   5. Start the JSON-RPC server and all background activities
//!   6. On ctrl-c: announce goodbye, drain activities, flush the store

mod services;

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use gridx_core::config::GridxConfig;
use gridx_core::types::NodeId;
use gridx_rpc::{RpcServer, RpcServerState};

use crate::services::CoreServices;

#[derive(Parser, Debug)]
#[command(
    name = "gridx-node",
    version,
    about = "GridX node — decentralized compute marketplace coordination plane"
)]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// This node's id (overrides the config file).
    #[arg(long)]
    node_id: Option<String>,

    /// Directory for the persistent store (overrides the config file).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON-RPC listen address (overrides the config file).
    #[arg(long)]
    rpc_addr: Option<SocketAddr>,

    /// P2P listen port (overrides the config file).
    #[arg(long)]
    p2p_listen_port: Option<u16>,

    /// P2P broadcast port (overrides the config file).
    #[arg(long)]
    p2p_broadcast_port: Option<u16>,

    /// Capabilities this node advertises (comma-separated).
    #[arg(long, value_delimiter = ',')]
    capabilities: Vec<String>,

    /// Number of local task workers (overrides the config file).
    #[arg(long)]
    workers: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridx=debug".parse().expect("static filter")),
        )
        .init();

    let args = Args::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = match &args.config {
        Some(path) => GridxConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GridxConfig::default(),
    };
    if let Some(node_id) = &args.node_id {
        config.node_id = node_id.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.store.path = data_dir.display().to_string();
    }
    if let Some(port) = args.p2p_listen_port {
        config.p2p.listen_port = port;
    }
    if let Some(port) = args.p2p_broadcast_port {
        config.p2p.broadcast_port = port;
    }
    if let Some(addr) = args.rpc_addr {
        config.rpc.listen_addr = addr.to_string();
    }
    if let Some(workers) = args.workers {
        config.scheduler.workers = workers;
    }
    config.validate().context("validating configuration")?;

    info!(node_id = %config.node_id, "GridX node starting");
    std::fs::create_dir_all(&config.store.path)
        .with_context(|| format!("creating data dir {}", config.store.path))?;

    // ── Services ──────────────────────────────────────────────────────────────
    let services = CoreServices::init(config).await?;

    // Own record: the presence broadcaster mirrors it into every hello.
    let own_capabilities: BTreeSet<String> = args.capabilities.into_iter().collect();
    services
        .registry
        .register(
            NodeId::new(services.config.node_id.clone()),
            format!("0.0.0.0:{}", services.config.p2p.listen_port),
            own_capabilities,
            None,
            BTreeMap::from([("discovered_via".to_string(), "local".to_string())]),
            None,
            chrono::Utc::now().timestamp(),
        )
        .context("registering own node record")?;

    // ── Background activities ─────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = services.spawn_activities(&shutdown_rx);

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_state = std::sync::Arc::new(RpcServerState {
        registry: services.registry.clone(),
        scheduler: services.scheduler.clone(),
        escrow: services.escrow.clone(),
        p2p: Some(services.p2p.clone()),
    });
    let rpc_handle = RpcServer::new(rpc_state)
        .start(&services.config.rpc)
        .await
        .context("starting RPC server")?;

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");

    // ── Teardown, reverse order: stop intake, goodbye, drain, flush ──────────
    let _ = rpc_handle.stop();
    shutdown_tx.send(true).ok();
    for handle in handles {
        if tokio::time::timeout(std::time::Duration::from_secs(10), handle)
            .await
            .is_err()
        {
            warn!("activity did not drain within the shutdown deadline");
        }
    }
    services.store.flush().context("flushing store")?;
    info!("shutdown complete");
    Ok(())
}
