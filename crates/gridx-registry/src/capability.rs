use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde::Serialize;

use gridx_core::constants::STANDARD_CAPABILITIES;
use gridx_core::types::NodeId;

/// How a multi-capability lookup combines its tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityMatch {
    /// Node must carry every requested tag.
    All,
    /// Node must carry at least one requested tag.
    Any,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityStats {
    pub total_nodes: usize,
    pub counts: BTreeMap<String, usize>,
    /// Up to five most common capabilities, descending by node count.
    pub most_common: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityValidation {
    pub capability: String,
    pub well_formed: bool,
    pub is_standard: bool,
}

#[derive(Default)]
struct IndexInner {
    by_cap: HashMap<String, BTreeSet<NodeId>>,
    by_node: HashMap<NodeId, BTreeSet<String>>,
}

/// Bidirectional in-memory index: capability → nodes and node → capabilities.
///
/// A derived view over registry records; reads vastly outnumber writes, so it
/// sits behind a reader-writer lock. Rebuilt from the store on startup.
pub struct CapabilityIndex {
    inner: RwLock<IndexInner>,
    standard: BTreeSet<String>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            standard: STANDARD_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Insert or fully replace a node's capability set.
    pub fn replace(&self, node_id: &NodeId, caps: &BTreeSet<String>) {
        let mut inner = self.inner.write().expect("capability index lock poisoned");
        if let Some(old) = inner.by_node.remove(node_id) {
            for cap in old {
                if let Some(set) = inner.by_cap.get_mut(&cap) {
                    set.remove(node_id);
                    if set.is_empty() {
                        inner.by_cap.remove(&cap);
                    }
                }
            }
        }
        for cap in caps {
            inner
                .by_cap
                .entry(cap.clone())
                .or_default()
                .insert(node_id.clone());
        }
        inner.by_node.insert(node_id.clone(), caps.clone());
    }

    /// Drop a node from both directions of the index.
    pub fn remove(&self, node_id: &NodeId) {
        let mut inner = self.inner.write().expect("capability index lock poisoned");
        if let Some(caps) = inner.by_node.remove(node_id) {
            for cap in caps {
                if let Some(set) = inner.by_cap.get_mut(&cap) {
                    set.remove(node_id);
                    if set.is_empty() {
                        inner.by_cap.remove(&cap);
                    }
                }
            }
        }
    }

    /// Nodes matching `caps` under the given match mode.
    ///
    /// An empty request matches every indexed node.
    pub fn lookup(&self, caps: &BTreeSet<String>, mode: CapabilityMatch) -> Vec<NodeId> {
        let inner = self.inner.read().expect("capability index lock poisoned");
        if caps.is_empty() {
            return inner.by_node.keys().cloned().collect();
        }
        inner
            .by_node
            .iter()
            .filter(|(_, node_caps)| match mode {
                CapabilityMatch::All => caps.iter().all(|c| node_caps.contains(c)),
                CapabilityMatch::Any => caps.iter().any(|c| node_caps.contains(c)),
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn capabilities_of(&self, node_id: &NodeId) -> Option<BTreeSet<String>> {
        let inner = self.inner.read().expect("capability index lock poisoned");
        inner.by_node.get(node_id).cloned()
    }

    pub fn contains(&self, cap: &str, node_id: &NodeId) -> bool {
        let inner = self.inner.read().expect("capability index lock poisoned");
        inner
            .by_cap
            .get(cap)
            .map(|set| set.contains(node_id))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> CapabilityStats {
        let inner = self.inner.read().expect("capability index lock poisoned");
        let counts: BTreeMap<String, usize> = inner
            .by_cap
            .iter()
            .map(|(cap, nodes)| (cap.clone(), nodes.len()))
            .collect();
        let mut most_common: Vec<(String, usize)> =
            counts.iter().map(|(c, n)| (c.clone(), *n)).collect();
        most_common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_common.truncate(5);
        CapabilityStats {
            total_nodes: inner.by_node.len(),
            counts,
            most_common,
        }
    }

    /// Syntax check plus standard-vocabulary membership. Custom tags are
    /// accepted everywhere; `is_standard` is informational.
    pub fn validate(&self, capability: &str) -> CapabilityValidation {
        let well_formed = !capability.is_empty()
            && capability.len() <= 64
            && capability
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        CapabilityValidation {
            capability: capability.to_string(),
            well_formed,
            is_standard: self.standard.contains(capability),
        }
    }

    pub fn standard_capabilities(&self) -> Vec<String> {
        self.standard.iter().cloned().collect()
    }
}

impl Default for CapabilityIndex {
    fn default() -> Self {
        Self::new()
    }
}
