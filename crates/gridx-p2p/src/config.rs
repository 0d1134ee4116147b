use gridx_core::constants::{
    DEFAULT_P2P_BROADCAST_PORT, DEFAULT_P2P_LISTEN_PORT, P2P_CLEANUP_INTERVAL_SECS,
    PEER_EXPIRY_SECS, PRESENCE_INTERVAL_SECS,
};

/// Configuration for the presence protocol.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// This node's id, announced in every broadcast.
    pub node_id: String,
    /// UDP port the protocol binds and receives on.
    pub listen_port: u16,
    /// UDP port broadcasts are addressed to (peers' listen port).
    pub broadcast_port: u16,
    /// Broadcast destination address (loopback in tests).
    pub broadcast_addr: String,
    /// Seconds between `hello` broadcasts.
    pub presence_interval_s: u64,
    /// Peers silent longer than this are evicted from the P2P view.
    pub peer_expiry_s: i64,
    /// Cadence of message-history and peer-expiry cleanup.
    pub cleanup_interval_s: u64,
    /// Register newly heard peers into the node registry.
    pub auto_register: bool,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            listen_port: DEFAULT_P2P_LISTEN_PORT,
            broadcast_port: DEFAULT_P2P_BROADCAST_PORT,
            broadcast_addr: "255.255.255.255".into(),
            presence_interval_s: PRESENCE_INTERVAL_SECS,
            peer_expiry_s: PEER_EXPIRY_SECS,
            cleanup_interval_s: P2P_CLEANUP_INTERVAL_SECS,
            auto_register: true,
        }
    }
}
