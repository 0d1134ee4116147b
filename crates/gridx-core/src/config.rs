use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BACKOFF_MAX_RETRIES, CHAIN_RPC_TIMEOUT_SECS, DEFAULT_COMMUNITY_FUND_DESTINATION,
    DEFAULT_COMMUNITY_SHARE_BP, DEFAULT_P2P_BROADCAST_PORT, DEFAULT_P2P_LISTEN_PORT,
    LIVENESS_SWEEP_SECS, OFFLINE_THRESHOLD_SECS, P2P_CLEANUP_INTERVAL_SECS, PEER_EXPIRY_SECS,
    PRESENCE_INTERVAL_SECS, WATCHDOG_GRACE_SECS, WATCHDOG_PERIOD_SECS,
};
use crate::currency::Currency;
use crate::error::GridxError;

/// Top-level node configuration, loaded from a JSON file. Every field has a
/// default so a minimal file only needs `node_id` and `store.path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridxConfig {
    pub node_id: String,
    pub store: StoreConfig,
    pub p2p: P2pSection,
    pub registry: RegistrySection,
    pub escrow: EscrowSection,
    pub scheduler: SchedulerSection,
    pub chain: ChainSection,
    pub rpc: RpcSection,
    pub supported_currencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pSection {
    pub listen_port: u16,
    pub broadcast_port: u16,
    pub broadcast_addr: String,
    pub presence_interval_s: u64,
    pub peer_expiry_s: i64,
    pub cleanup_interval_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub offline_threshold_s: i64,
    pub liveness_sweep_s: u64,
    pub auto_register_p2p: bool,
    pub require_auth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowSection {
    /// Community share of settlements, in basis points (500 = 5%).
    pub community_share_bp: u32,
    pub community_fund_destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub watchdog_period_s: u64,
    pub watchdog_grace_s: i64,
    /// Number of local task workers. 0 = this node does not execute tasks.
    pub workers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    pub rpc_timeout_s: u64,
    pub max_retries: u32,
    /// Stub adapters return deterministic placeholder values; production
    /// deployments must configure real endpoints and disable this.
    pub use_stub_adapters: bool,
    /// Currency symbol → daemon JSON-RPC endpoint URL.
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub listen_addr: String,
    /// Attach permissive CORS headers for browser-based dashboards.
    pub allow_cors: bool,
}

impl Default for GridxConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            store: StoreConfig::default(),
            p2p: P2pSection::default(),
            registry: RegistrySection::default(),
            escrow: EscrowSection::default(),
            scheduler: SchedulerSection::default(),
            chain: ChainSection::default(),
            rpc: RpcSection::default(),
            supported_currencies: Currency::ALL.iter().map(|c| c.symbol().to_string()).collect(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: String::new() }
    }
}

impl Default for P2pSection {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_P2P_LISTEN_PORT,
            broadcast_port: DEFAULT_P2P_BROADCAST_PORT,
            broadcast_addr: "255.255.255.255".into(),
            presence_interval_s: PRESENCE_INTERVAL_SECS,
            peer_expiry_s: PEER_EXPIRY_SECS,
            cleanup_interval_s: P2P_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            offline_threshold_s: OFFLINE_THRESHOLD_SECS,
            liveness_sweep_s: LIVENESS_SWEEP_SECS,
            auto_register_p2p: true,
            require_auth: false,
        }
    }
}

impl Default for EscrowSection {
    fn default() -> Self {
        Self {
            community_share_bp: DEFAULT_COMMUNITY_SHARE_BP,
            community_fund_destination: DEFAULT_COMMUNITY_FUND_DESTINATION.into(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            watchdog_period_s: WATCHDOG_PERIOD_SECS,
            watchdog_grace_s: WATCHDOG_GRACE_SECS,
            workers: 0,
        }
    }
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            rpc_timeout_s: CHAIN_RPC_TIMEOUT_SECS,
            max_retries: BACKOFF_MAX_RETRIES,
            use_stub_adapters: true,
            endpoints: BTreeMap::new(),
        }
    }
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8560".into(),
            allow_cors: true,
        }
    }
}

impl GridxConfig {
    /// Load and validate a config file. Startup aborts on any error here.
    pub fn load(path: &Path) -> Result<Self, GridxError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GridxError::Storage(format!("reading config {}: {e}", path.display())))?;
        let config: GridxConfig = serde_json::from_str(&text)
            .map_err(|e| GridxError::Serialization(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GridxError> {
        if self.node_id.is_empty() {
            return Err(GridxError::EmptyNodeId);
        }
        if self.store.path.is_empty() {
            return Err(GridxError::InvalidConfig("store.path is not set".into()));
        }
        if self.p2p.listen_port == self.p2p.broadcast_port {
            return Err(GridxError::InvalidConfig(format!(
                "p2p listen and broadcast ports must differ (both {})",
                self.p2p.listen_port
            )));
        }
        if self.escrow.community_share_bp > 10_000 {
            return Err(GridxError::InvalidConfig(format!(
                "community share {} bp exceeds 10000",
                self.escrow.community_share_bp
            )));
        }
        for symbol in &self.supported_currencies {
            symbol.parse::<Currency>()?;
        }
        Ok(())
    }

    /// The validated currency set this process will accept.
    pub fn currencies(&self) -> Vec<Currency> {
        self.supported_currencies
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> GridxConfig {
        GridxConfig {
            node_id: "n1".into(),
            store: StoreConfig { path: "/tmp/gridx".into() },
            ..GridxConfig::default()
        }
    }

    #[test]
    fn defaults_validate() {
        minimal().validate().unwrap();
    }

    #[test]
    fn missing_node_id_rejected() {
        let mut c = minimal();
        c.node_id.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn bad_currency_rejected() {
        let mut c = minimal();
        c.supported_currencies.push("PEPE".into());
        assert!(c.validate().is_err());
    }

    #[test]
    fn colliding_ports_rejected() {
        let mut c = minimal();
        c.p2p.broadcast_port = c.p2p.listen_port;
        assert!(c.validate().is_err());
    }

    #[test]
    fn minimal_file_parses_with_defaults() {
        let json = r#"{"node_id": "n1", "store": {"path": "/tmp/db"}}"#;
        let c: GridxConfig = serde_json::from_str(json).unwrap();
        c.validate().unwrap();
        assert_eq!(c.p2p.listen_port, 9334);
        assert_eq!(c.escrow.community_share_bp, 500);
        assert_eq!(c.supported_currencies.len(), 11);
    }
}
