use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use gridx_chain::AdapterRegistry;
use gridx_core::config::GridxConfig;
use gridx_core::types::NodeId;
use gridx_escrow::EscrowService;
use gridx_p2p::{P2pConfig, PresenceProtocol};
use gridx_registry::NodeRegistry;
use gridx_scheduler::{run_worker, Sandbox, TaskScheduler};
use gridx_store::Store;

/// Every long-lived service of the node, constructed once at startup and
/// passed by Arc to each activity. Teardown is the reverse: signal shutdown,
/// join activities, flush the store.
pub struct CoreServices {
    pub config: GridxConfig,
    pub store: Arc<Store>,
    pub registry: Arc<NodeRegistry>,
    pub escrow: Arc<EscrowService>,
    pub chains: Arc<AdapterRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    pub p2p: Arc<PresenceProtocol>,
}

impl CoreServices {
    /// Wire up the full service graph, leaves first.
    pub async fn init(config: GridxConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            Store::open(&config.store.path)
                .with_context(|| format!("opening store at {}", config.store.path))?,
        );

        let registry = Arc::new(
            NodeRegistry::open(store.clone(), config.registry.clone())
                .context("opening node registry")?,
        );

        let currencies = config.currencies();
        let chains = Arc::new(
            AdapterRegistry::from_config(&config.chain, &currencies)
                .context("building chain adapters")?,
        );

        let escrow = Arc::new(EscrowService::new(
            store.clone(),
            config.escrow.clone(),
            chains.supported_currencies(),
        ));

        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            registry.clone(),
            escrow.clone(),
            chains.clone(),
            config.scheduler.clone(),
        ));

        let p2p_config = P2pConfig {
            node_id: config.node_id.clone(),
            listen_port: config.p2p.listen_port,
            broadcast_port: config.p2p.broadcast_port,
            broadcast_addr: config.p2p.broadcast_addr.clone(),
            presence_interval_s: config.p2p.presence_interval_s,
            peer_expiry_s: config.p2p.peer_expiry_s,
            cleanup_interval_s: config.p2p.cleanup_interval_s,
            auto_register: config.registry.auto_register_p2p,
        };
        let p2p = PresenceProtocol::bind(p2p_config, Some(registry.clone()))
            .await
            .context("binding presence protocol")?;

        Ok(Self { config, store, registry, escrow, chains, scheduler, p2p })
    }

    /// Spawn every background activity. Each observes `shutdown` and exits
    /// on its own; the caller joins the handles afterwards.
    pub fn spawn_activities(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(
            self.p2p.clone().run_listener(shutdown.clone()),
        ));
        handles.push(tokio::spawn(
            self.p2p.clone().run_broadcaster(shutdown.clone()),
        ));
        handles.push(tokio::spawn(self.p2p.clone().run_cleanup(shutdown.clone())));
        handles.push(tokio::spawn(
            self.registry.clone().run_liveness_reconciler(shutdown.clone()),
        ));
        handles.push(tokio::spawn(
            self.scheduler.clone().run_watchdog(shutdown.clone()),
        ));

        let workers = self.config.scheduler.workers;
        if workers > 0 {
            let sandbox = Arc::new(Sandbox::Process(gridx_scheduler::ProcessSandbox));
            for _ in 0..workers {
                handles.push(tokio::spawn(run_worker(
                    self.scheduler.clone(),
                    self.registry.clone(),
                    sandbox.clone(),
                    NodeId::new(self.config.node_id.clone()),
                    shutdown.clone(),
                )));
            }
            info!(workers, "local task workers started");
        }

        handles
    }
}
