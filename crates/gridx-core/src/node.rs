use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, Timestamp};

// ── NodeStatus ───────────────────────────────────────────────────────────────

/// Health status of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unknown,
    Healthy,
    Unhealthy,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Healthy => "healthy",
            NodeStatus::Unhealthy => "unhealthy",
            NodeStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(NodeStatus::Unknown),
            "healthy" => Ok(NodeStatus::Healthy),
            "unhealthy" => Ok(NodeStatus::Unhealthy),
            "offline" => Ok(NodeStatus::Offline),
            _ => Err(()),
        }
    }
}

// ── HardwareProfile ──────────────────────────────────────────────────────────

/// Optional self-reported hardware floor, used by registry queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct HardwareProfile {
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub storage_gb: f64,
    pub gpu: bool,
}

impl HardwareProfile {
    /// Whether this profile satisfies `min` in every dimension.
    pub fn meets(&self, min: &HardwareProfile) -> bool {
        self.cpu_cores >= min.cpu_cores
            && self.memory_gb >= min.memory_gb
            && self.storage_gb >= min.storage_gb
            && (self.gpu || !min.gpu)
    }
}

// ── NodeRecord ───────────────────────────────────────────────────────────────

/// The canonical registry record for a node. Owned by the durable store; the
/// capability index and the P2P peer table are derived views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    /// Network address as `ip:port`.
    pub address: String,
    /// Capability tags; always a set, never a list with duplicates.
    pub capabilities: BTreeSet<String>,
    /// Bounded score in [0, 100].
    pub reputation: f64,
    pub status: NodeStatus,
    pub last_heartbeat: Timestamp,
    pub registered_at: Timestamp,
    pub hardware: Option<HardwareProfile>,
    /// Hex-encoded authentication key material, when auth mode is enabled.
    pub public_key: Option<String>,
    /// Free-form annotations (e.g. discovery provenance).
    pub metadata: BTreeMap<String, String>,
}

impl NodeRecord {
    pub fn new(node_id: NodeId, address: String, capabilities: BTreeSet<String>, now: Timestamp) -> Self {
        Self {
            node_id,
            address,
            capabilities,
            reputation: 0.0,
            status: NodeStatus::Healthy,
            last_heartbeat: now,
            registered_at: now,
            hardware: None,
            public_key: None,
            metadata: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_floor_comparison() {
        let node = HardwareProfile { cpu_cores: 8, memory_gb: 32.0, storage_gb: 500.0, gpu: false };
        let min = HardwareProfile { cpu_cores: 4, memory_gb: 16.0, storage_gb: 100.0, gpu: false };
        assert!(node.meets(&min));

        let needs_gpu = HardwareProfile { gpu: true, ..min };
        assert!(!node.meets(&needs_gpu));
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [NodeStatus::Unknown, NodeStatus::Healthy, NodeStatus::Unhealthy, NodeStatus::Offline] {
            assert_eq!(s.as_str().parse::<NodeStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<NodeStatus>().is_err());
    }
}
