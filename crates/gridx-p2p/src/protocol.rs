use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridx_core::constants::MAX_DATAGRAM_BYTES;
use gridx_core::error::GridxError;
use gridx_core::node::NodeStatus;
use gridx_core::types::{NodeId, Timestamp};
use gridx_registry::{AuthData, NodeRegistry};

use crate::config::P2pConfig;
use crate::message::{HelloPayload, MessageType, PresenceMessage};
use crate::peers::{PeerInfo, PeerTable};

/// The presence protocol endpoint.
///
/// One UDP socket, bound to the listen port, serves broadcast sends,
/// unicast replies, and receives. Three long-lived activities drive it:
/// the broadcaster, the listener, and the cleanup sweep — each observes the
/// shutdown signal, and the broadcaster sends a `goodbye` on its way out.
pub struct PresenceProtocol {
    config: P2pConfig,
    node_id: NodeId,
    socket: UdpSocket,
    peers: PeerTable,
    registry: Option<Arc<NodeRegistry>>,
}

impl PresenceProtocol {
    /// Bind the UDP socket and assemble the protocol state.
    pub async fn bind(
        config: P2pConfig,
        registry: Option<Arc<NodeRegistry>>,
    ) -> Result<Arc<Self>, GridxError> {
        let bind_addr = format!("0.0.0.0:{}", config.listen_port);
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|e| GridxError::Network(format!("binding {bind_addr}: {e}")))?;
        socket
            .set_broadcast(true)
            .map_err(|e| GridxError::Network(format!("enabling broadcast: {e}")))?;
        info!(port = config.listen_port, "presence protocol bound");
        Ok(Arc::new(Self {
            node_id: NodeId::new(config.node_id.clone()),
            config,
            socket,
            peers: PeerTable::new(),
            registry,
        }))
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn advertised_address(&self) -> String {
        format!("0.0.0.0:{}", self.config.listen_port)
    }

    fn now_secs() -> Timestamp {
        chrono::Utc::now().timestamp()
    }

    fn wire_timestamp() -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Broadcast a message to the configured broadcast address and port.
    pub async fn broadcast(
        &self,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Result<(), GridxError> {
        let msg = PresenceMessage::new(
            message_type,
            self.node_id.as_str(),
            &self.advertised_address(),
            Self::wire_timestamp(),
            payload,
        );
        let bytes = msg.to_bytes()?;
        let target = format!("{}:{}", self.config.broadcast_addr, self.config.broadcast_port);
        self.socket
            .send_to(&bytes, &target)
            .await
            .map_err(|e| GridxError::Network(format!("broadcast to {target}: {e}")))?;
        debug!(message_type = ?message_type, "broadcast sent");
        Ok(())
    }

    /// Unicast a message to a specific peer address.
    pub async fn send_to(
        &self,
        target: SocketAddr,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Result<(), GridxError> {
        let msg = PresenceMessage::new(
            message_type,
            self.node_id.as_str(),
            &self.advertised_address(),
            Self::wire_timestamp(),
            payload,
        );
        let bytes = msg.to_bytes()?;
        self.socket
            .send_to(&bytes, target)
            .await
            .map_err(|e| GridxError::Network(format!("send to {target}: {e}")))?;
        Ok(())
    }

    /// This node's own hello/health payload, mirrored from its registry
    /// record when one exists.
    fn own_payload(&self) -> serde_json::Value {
        let (capabilities, reputation, health_status) = match &self.registry {
            Some(registry) => match registry.get(&self.node_id) {
                Ok(record) => (
                    record.capabilities.iter().cloned().collect::<Vec<_>>(),
                    record.reputation,
                    record.status.as_str().to_string(),
                ),
                Err(_) => (Vec::new(), 0.0, "unknown".to_string()),
            },
            None => (Vec::new(), 0.0, "unknown".to_string()),
        };
        serde_json::json!({
            "node_id": self.node_id.as_str(),
            "capabilities": capabilities,
            "reputation": reputation,
            "health_status": health_status,
        })
    }

    // ── Activities ───────────────────────────────────────────────────────────

    /// Announce presence on the configured interval; `goodbye` on shutdown.
    pub async fn run_broadcaster(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.presence_interval_s.max(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.broadcast(MessageType::Hello, self.own_payload()).await {
                        warn!(error = %e, "presence broadcast failed, will retry next tick");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means the node is going away too.
                    if changed.is_err() || *shutdown.borrow() {
                        let payload = serde_json::json!({
                            "node_id": self.node_id.as_str(),
                            "reason": "shutdown",
                        });
                        if let Err(e) = self.broadcast(MessageType::Goodbye, payload).await {
                            warn!(error = %e, "goodbye broadcast failed");
                        }
                        debug!("broadcaster stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Receive and dispatch datagrams until shutdown.
    pub async fn run_listener(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            tokio::select! {
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, src)) => self.handle_datagram(&buf[..len], src).await,
                        Err(e) => warn!(error = %e, "udp receive failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("listener stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Periodically clear message history and evict silent peers.
    pub async fn run_cleanup(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.cleanup_interval_s.max(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.peers.cleanup(Self::now_secs(), self.config.peer_expiry_s);
                    for node_id in evicted {
                        info!(node_id = %node_id, "peer expired from p2p view");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("cleanup stopping");
                        return;
                    }
                }
            }
        }
    }

    // ── Receiving ────────────────────────────────────────────────────────────

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        let msg = match PresenceMessage::from_bytes(data) {
            Ok(msg) => msg,
            Err(e) => {
                // Unknown message types land here too: logged and dropped.
                debug!(src = %src, error = %e, "dropping undecodable datagram");
                return;
            }
        };
        if msg.sender_id == self.node_id.as_str() {
            return;
        }
        if self.peers.seen_message(&msg.message_id) {
            debug!(message_id = %msg.message_id, "dropping repeated message");
            return;
        }

        match msg.message_type {
            MessageType::Hello => self.handle_hello(&msg, src).await,
            MessageType::Goodbye => self.handle_goodbye(&msg),
            MessageType::HealthBroadcast => self.handle_health(&msg),
            MessageType::Ping => self.handle_ping(&msg, src).await,
            MessageType::Pong => {
                debug!(sender = %msg.sender_id, "pong received");
            }
            MessageType::NodeRegister => self.handle_node_register(&msg, src),
            MessageType::NodeUpdate => self.handle_node_update(&msg),
        }
    }

    async fn handle_hello(&self, msg: &PresenceMessage, src: SocketAddr) {
        let payload: HelloPayload =
            serde_json::from_value(msg.payload.clone()).unwrap_or_default();
        let status = payload
            .health_status
            .parse::<NodeStatus>()
            .unwrap_or(NodeStatus::Unknown);
        let peer_id = NodeId::new(msg.sender_id.clone());
        let now = Self::now_secs();
        let newly_discovered = !self.peers.contains(&peer_id);

        self.peers.upsert(PeerInfo {
            node_id: peer_id.clone(),
            address: src.to_string(),
            capabilities: payload.capabilities.clone(),
            reputation: payload.reputation,
            health_status: status,
            last_seen: now,
        });
        if newly_discovered {
            info!(node_id = %peer_id, address = %src, "new peer discovered");
        }

        let Some(registry) = &self.registry else { return };
        let auth = auth_from(&msg.payload);
        if registry.get(&peer_id).is_err() {
            if self.config.auto_register {
                let capabilities: BTreeSet<String> = payload.capabilities.iter().cloned().collect();
                let mut metadata = BTreeMap::new();
                metadata.insert("discovered_via".to_string(), "p2p".to_string());
                metadata.insert("discovery_time".to_string(), now.to_string());
                if let Err(e) = registry.register(
                    peer_id.clone(),
                    src.to_string(),
                    capabilities,
                    None,
                    metadata,
                    auth.as_ref(),
                    now,
                ) {
                    warn!(node_id = %peer_id, error = %e, "auto-registration failed");
                }
            }
        } else {
            if let Err(e) = registry.heartbeat(&peer_id, auth.as_ref(), now) {
                debug!(node_id = %peer_id, error = %e, "heartbeat from hello failed");
            }
            if let Err(e) = registry.set_status(&peer_id, status, auth.as_ref()) {
                debug!(node_id = %peer_id, error = %e, "status update from hello failed");
            }
        }
    }

    fn handle_goodbye(&self, msg: &PresenceMessage) {
        let peer_id = NodeId::new(msg.sender_id.clone());
        if self.peers.remove(&peer_id) {
            info!(node_id = %peer_id, "peer left the network");
        }
    }

    fn handle_health(&self, msg: &PresenceMessage) {
        let payload: HelloPayload =
            serde_json::from_value(msg.payload.clone()).unwrap_or_default();
        let status = payload
            .health_status
            .parse::<NodeStatus>()
            .unwrap_or(NodeStatus::Unknown);
        let peer_id = NodeId::new(msg.sender_id.clone());
        let now = Self::now_secs();
        self.peers.touch_health(&peer_id, status, now);

        if let Some(registry) = &self.registry {
            let auth = auth_from(&msg.payload);
            if let Err(e) = registry.heartbeat(&peer_id, auth.as_ref(), now) {
                debug!(node_id = %peer_id, error = %e, "heartbeat from health broadcast failed");
            }
            if let Err(e) = registry.set_status(&peer_id, status, auth.as_ref()) {
                debug!(node_id = %peer_id, error = %e, "status from health broadcast failed");
            }
        }
    }

    async fn handle_ping(&self, msg: &PresenceMessage, src: SocketAddr) {
        let payload = serde_json::json!({ "original_ping_id": msg.message_id });
        if let Err(e) = self.send_to(src, MessageType::Pong, payload).await {
            debug!(src = %src, error = %e, "pong reply failed");
        }
    }

    fn handle_node_register(&self, msg: &PresenceMessage, src: SocketAddr) {
        let Some(registry) = &self.registry else {
            debug!("node_register ignored: no registry attached");
            return;
        };
        let node_id = msg.payload.get("node_id").and_then(|v| v.as_str());
        let address = msg
            .payload
            .get("address")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| src.to_string());
        let Some(node_id) = node_id else {
            debug!("node_register missing node_id, dropped");
            return;
        };
        let capabilities: BTreeSet<String> = msg
            .payload
            .get("capabilities")
            .and_then(|v| v.as_array())
            .map(|caps| {
                caps.iter()
                    .filter_map(|c| c.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let auth = auth_from(&msg.payload);
        if let Err(e) = registry.register(
            NodeId::from(node_id),
            address,
            capabilities,
            None,
            BTreeMap::new(),
            auth.as_ref(),
            Self::now_secs(),
        ) {
            warn!(node_id = %node_id, error = %e, "p2p node_register failed");
        }
    }

    fn handle_node_update(&self, msg: &PresenceMessage) {
        let Some(registry) = &self.registry else { return };
        let Some(node_id) = msg.payload.get("node_id").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(status) = msg
            .payload
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<NodeStatus>().ok())
        else {
            return;
        };
        let auth = auth_from(&msg.payload);
        if let Err(e) = registry.set_status(&NodeId::from(node_id), status, auth.as_ref()) {
            debug!(node_id = %node_id, error = %e, "p2p node_update failed");
        }
    }
}

/// Optional signature material carried inside a message payload.
fn auth_from(payload: &serde_json::Value) -> Option<AuthData> {
    payload
        .get("auth_data")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}
