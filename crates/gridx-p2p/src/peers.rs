use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;

use gridx_core::node::NodeStatus;
use gridx_core::types::{NodeId, Timestamp};

/// What this node currently knows about a peer, learned from its broadcasts.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub node_id: NodeId,
    /// Observed source address (`ip:port`) of the peer's datagrams.
    pub address: String,
    pub capabilities: Vec<String>,
    pub reputation: f64,
    pub health_status: NodeStatus,
    pub last_seen: Timestamp,
}

/// Aggregate view of the P2P neighborhood.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub total_peers: usize,
    pub healthy_peers: usize,
    pub unhealthy_peers: usize,
    pub average_reputation: f64,
    pub message_history_size: usize,
}

#[derive(Default)]
struct TableInner {
    peers: HashMap<NodeId, PeerInfo>,
    message_history: HashSet<String>,
}

/// The peer table and message-id history, guarded by a single mutex held
/// only while the table is being read or updated.
pub struct PeerTable {
    inner: Mutex<TableInner>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self { inner: Mutex::new(TableInner::default()) }
    }

    /// Record a message id. Returns true when it was already seen (a loop or
    /// duplicate that the caller must drop).
    pub fn seen_message(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("peer table lock poisoned");
        !inner.message_history.insert(message_id.to_string())
    }

    pub fn upsert(&self, peer: PeerInfo) {
        let mut inner = self.inner.lock().expect("peer table lock poisoned");
        inner.peers.insert(peer.node_id.clone(), peer);
    }

    pub fn remove(&self, node_id: &NodeId) -> bool {
        let mut inner = self.inner.lock().expect("peer table lock poisoned");
        inner.peers.remove(node_id).is_some()
    }

    /// Update a known peer's health and liveness; no-op for strangers.
    pub fn touch_health(&self, node_id: &NodeId, status: NodeStatus, now: Timestamp) {
        let mut inner = self.inner.lock().expect("peer table lock poisoned");
        if let Some(peer) = inner.peers.get_mut(node_id) {
            peer.health_status = status;
            peer.last_seen = now;
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<PeerInfo> {
        let inner = self.inner.lock().expect("peer table lock poisoned");
        inner.peers.get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        let inner = self.inner.lock().expect("peer table lock poisoned");
        inner.peers.contains_key(node_id)
    }

    pub fn list(&self) -> Vec<PeerInfo> {
        let inner = self.inner.lock().expect("peer table lock poisoned");
        inner.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("peer table lock poisoned");
        inner.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the message history and evict peers not seen within `expiry_s`.
    /// Returns the evicted node ids.
    pub fn cleanup(&self, now: Timestamp, expiry_s: i64) -> Vec<NodeId> {
        let mut inner = self.inner.lock().expect("peer table lock poisoned");
        inner.message_history.clear();
        let expired: Vec<NodeId> = inner
            .peers
            .iter()
            .filter(|(_, p)| now - p.last_seen > expiry_s)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.peers.remove(id);
        }
        expired
    }

    pub fn stats(&self) -> NetworkStats {
        let inner = self.inner.lock().expect("peer table lock poisoned");
        let total = inner.peers.len();
        let healthy = inner
            .peers
            .values()
            .filter(|p| p.health_status == NodeStatus::Healthy)
            .count();
        let average_reputation = if total > 0 {
            inner.peers.values().map(|p| p.reputation).sum::<f64>() / total as f64
        } else {
            0.0
        };
        NetworkStats {
            total_peers: total,
            healthy_peers: healthy,
            unhealthy_peers: total - healthy,
            average_reputation,
            message_history_size: inner.message_history.len(),
        }
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, last_seen: Timestamp) -> PeerInfo {
        PeerInfo {
            node_id: NodeId::from(id),
            address: "10.0.0.1:9334".into(),
            capabilities: vec!["python".into()],
            reputation: 10.0,
            health_status: NodeStatus::Healthy,
            last_seen,
        }
    }

    #[test]
    fn duplicate_message_ids_are_flagged() {
        let table = PeerTable::new();
        assert!(!table.seen_message("abcd"));
        assert!(table.seen_message("abcd"));
        // History resets at cleanup: the id becomes fresh again.
        table.cleanup(0, 300);
        assert!(!table.seen_message("abcd"));
    }

    #[test]
    fn cleanup_evicts_only_silent_peers() {
        let table = PeerTable::new();
        table.upsert(peer("fresh", 1_000));
        table.upsert(peer("stale", 600));

        let evicted = table.cleanup(1_000, 300);
        assert_eq!(evicted, vec![NodeId::from("stale")]);
        assert!(table.contains(&NodeId::from("fresh")));
        assert!(!table.contains(&NodeId::from("stale")));
    }

    #[test]
    fn touch_health_updates_known_peers_only() {
        let table = PeerTable::new();
        table.upsert(peer("n1", 100));
        table.touch_health(&NodeId::from("n1"), NodeStatus::Unhealthy, 200);
        let p = table.get(&NodeId::from("n1")).unwrap();
        assert_eq!(p.health_status, NodeStatus::Unhealthy);
        assert_eq!(p.last_seen, 200);

        table.touch_health(&NodeId::from("ghost"), NodeStatus::Healthy, 200);
        assert!(!table.contains(&NodeId::from("ghost")));
    }

    #[test]
    fn stats_aggregate_the_view() {
        let table = PeerTable::new();
        table.upsert(peer("n1", 100));
        let mut sick = peer("n2", 100);
        sick.health_status = NodeStatus::Unhealthy;
        sick.reputation = 30.0;
        table.upsert(sick);

        let stats = table.stats();
        assert_eq!(stats.total_peers, 2);
        assert_eq!(stats.healthy_peers, 1);
        assert_eq!(stats.unhealthy_peers, 1);
        assert_eq!(stats.average_reputation, 20.0);
    }
}
