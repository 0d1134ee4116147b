use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridx_core::config::RegistrySection;
use gridx_core::error::GridxError;
use gridx_core::node::{HardwareProfile, NodeRecord, NodeStatus};
use gridx_core::reputation::ReputationEventKind;
use gridx_core::types::{NodeId, Timestamp};
use gridx_store::Store;

use crate::auth::{AuthData, AuthLevel, NodeAuthService};
use crate::capability::{CapabilityIndex, CapabilityMatch};
use crate::reputation::ReputationEngine;

/// Filter for [`NodeRegistry::query`]. Results sort by reputation descending
/// (node id ascending as the stable tiebreak).
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    pub capabilities: BTreeSet<String>,
    /// true = node must carry all requested tags; false = any.
    pub match_all: bool,
    pub min_reputation: Option<f64>,
    pub healthy_only: bool,
    pub min_hardware: Option<HardwareProfile>,
}

/// Outcome of a reputation event application.
#[derive(Debug, Clone, Serialize)]
pub struct ReputationUpdate {
    pub node_id: String,
    pub event: String,
    pub old_reputation: f64,
    pub new_reputation: f64,
    pub delta: f64,
    pub clamped: bool,
    /// false when a custom override bypassed the rule table.
    pub rule_applied: bool,
}

/// The node registry: owner of the canonical node records.
///
/// Persists through [`Store`]; the capability index is rebuilt from the store
/// on open. All status transitions flow through here — the P2P layer and the
/// scheduler only call in.
pub struct NodeRegistry {
    store: Arc<Store>,
    index: CapabilityIndex,
    reputation: ReputationEngine,
    auth: NodeAuthService,
    config: RegistrySection,
}

impl NodeRegistry {
    /// Open the registry over `store`, replaying node records into the
    /// capability index.
    pub fn open(store: Arc<Store>, config: RegistrySection) -> Result<Self, GridxError> {
        let registry = Self {
            store,
            index: CapabilityIndex::new(),
            reputation: ReputationEngine::new(),
            auth: NodeAuthService::new(),
            config,
        };
        let nodes = registry.store.iter_nodes()?;
        for node in &nodes {
            registry.index.replace(&node.node_id, &node.capabilities);
        }
        info!(nodes = nodes.len(), "registry opened, capability index rebuilt");
        Ok(registry)
    }

    pub fn capability_index(&self) -> &CapabilityIndex {
        &self.index
    }

    pub fn reputation_engine(&self) -> &ReputationEngine {
        &self.reputation
    }

    pub fn auth_service(&self) -> &NodeAuthService {
        &self.auth
    }

    // ── Auth gate ────────────────────────────────────────────────────────────

    /// When auth mode is on, verify the MAC and the caller's level. A brand
    /// new node has no identity yet; it is minted one at signed level on
    /// first sight and the call is admitted.
    fn check_auth(
        &self,
        node_id: &NodeId,
        operation: &'static str,
        required: AuthLevel,
        auth_data: Option<&AuthData>,
    ) -> Result<(), GridxError> {
        if !self.config.require_auth {
            return Ok(());
        }
        if !self.auth.has_identity(node_id) {
            let (_, key_id) = self.auth.generate_identity(node_id, AuthLevel::Signed);
            debug!(node_id = %node_id, key_id = %key_id, "minted identity for new node");
            // First sight admits signed-level operations only.
            return NodeAuthService::authorize(node_id, AuthLevel::Signed, operation, required);
        }
        let auth_data = auth_data.ok_or_else(|| GridxError::Unauthenticated(node_id.to_string()))?;
        let level = self.auth.verify(node_id, auth_data)?;
        NodeAuthService::authorize(node_id, level, operation, required)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Register a node, or update it if the id already exists: the address
    /// and capability set are replaced, status returns to healthy, and the
    /// heartbeat refreshes. Idempotent except for timestamps.
    pub fn register(
        &self,
        node_id: NodeId,
        address: String,
        capabilities: BTreeSet<String>,
        hardware: Option<HardwareProfile>,
        metadata: BTreeMap<String, String>,
        auth_data: Option<&AuthData>,
        now: Timestamp,
    ) -> Result<NodeRecord, GridxError> {
        if node_id.is_empty() {
            return Err(GridxError::EmptyNodeId);
        }
        if address.is_empty() {
            return Err(GridxError::EmptyAddress);
        }
        self.check_auth(&node_id, "register", AuthLevel::Signed, auth_data)?;

        let record = match self.store.get_node(&node_id)? {
            Some(mut existing) => {
                existing.address = address;
                existing.capabilities = capabilities;
                existing.status = NodeStatus::Healthy;
                existing.last_heartbeat = now;
                if hardware.is_some() {
                    existing.hardware = hardware;
                }
                existing.metadata.extend(metadata);
                existing
            }
            None => {
                let mut record = NodeRecord::new(node_id.clone(), address, capabilities, now);
                record.hardware = hardware;
                record.metadata = metadata;
                // Identity is minted by check_auth on first sight; record its key id.
                record.public_key = self.auth.key_id(&node_id);
                record
            }
        };
        self.store.put_node(&record)?;
        self.index.replace(&record.node_id, &record.capabilities);
        info!(node_id = %record.node_id, address = %record.address, "node registered");
        Ok(record)
    }

    /// Refresh the liveness timestamp. Never changes status.
    pub fn heartbeat(
        &self,
        node_id: &NodeId,
        auth_data: Option<&AuthData>,
        now: Timestamp,
    ) -> Result<(), GridxError> {
        self.check_auth(node_id, "heartbeat", AuthLevel::Signed, auth_data)?;
        self.store.update_node(node_id, |node| {
            node.last_heartbeat = now;
            Ok(())
        })?;
        Ok(())
    }

    /// Explicit status transition (from operators or the P2P layer).
    pub fn set_status(
        &self,
        node_id: &NodeId,
        status: NodeStatus,
        auth_data: Option<&AuthData>,
    ) -> Result<(), GridxError> {
        self.check_auth(node_id, "set_status", AuthLevel::Signed, auth_data)?;
        self.store.update_node(node_id, |node| {
            node.status = status;
            Ok(())
        })?;
        debug!(node_id = %node_id, status = %status, "node status set");
        Ok(())
    }

    /// Apply a reputation event and persist the clamped score.
    pub fn update_reputation(
        &self,
        node_id: &NodeId,
        event: ReputationEventKind,
        override_delta: Option<f64>,
        auth_data: Option<&AuthData>,
    ) -> Result<ReputationUpdate, GridxError> {
        self.check_auth(node_id, "update_reputation", AuthLevel::Signed, auth_data)?;
        // The mutate closure can re-run on transaction conflict; a cell keeps
        // the observed before/after pair from the winning attempt.
        let outcome = std::cell::RefCell::new(None);
        let updated = self.store.update_node(node_id, |node| {
            let (new, clamped) = self.reputation.apply(node.reputation, event, override_delta);
            *outcome.borrow_mut() = Some((node.reputation, new, clamped));
            node.reputation = new;
            Ok(())
        })?;
        let (old, new, clamped) = outcome
            .into_inner()
            .unwrap_or((updated.reputation, updated.reputation, false));
        info!(
            node_id = %node_id,
            event = %event,
            old = old,
            new = new,
            "reputation updated"
        );
        Ok(ReputationUpdate {
            node_id: node_id.to_string(),
            event: event.as_str().to_string(),
            old_reputation: old,
            new_reputation: new,
            delta: new - old,
            clamped,
            rule_applied: override_delta.is_none(),
        })
    }

    // ── Capability edits ─────────────────────────────────────────────────────

    /// Add tags to a node's capability set.
    pub fn add_capabilities(
        &self,
        node_id: &NodeId,
        capabilities: BTreeSet<String>,
        auth_data: Option<&AuthData>,
    ) -> Result<NodeRecord, GridxError> {
        self.check_auth(node_id, "add_capabilities", AuthLevel::Signed, auth_data)?;
        let updated = self.store.update_node(node_id, |node| {
            node.capabilities.extend(capabilities.iter().cloned());
            Ok(())
        })?;
        self.index.replace(node_id, &updated.capabilities);
        Ok(updated)
    }

    /// Remove tags from a node's capability set. Missing tags are ignored.
    pub fn remove_capabilities(
        &self,
        node_id: &NodeId,
        capabilities: BTreeSet<String>,
        auth_data: Option<&AuthData>,
    ) -> Result<NodeRecord, GridxError> {
        self.check_auth(node_id, "remove_capabilities", AuthLevel::Signed, auth_data)?;
        let updated = self.store.update_node(node_id, |node| {
            for cap in &capabilities {
                node.capabilities.remove(cap);
            }
            Ok(())
        })?;
        self.index.replace(node_id, &updated.capabilities);
        Ok(updated)
    }

    /// Replace a node's capability set wholesale.
    pub fn replace_capabilities(
        &self,
        node_id: &NodeId,
        capabilities: BTreeSet<String>,
        auth_data: Option<&AuthData>,
    ) -> Result<NodeRecord, GridxError> {
        self.check_auth(node_id, "update_capabilities", AuthLevel::Signed, auth_data)?;
        let caps = capabilities.clone();
        let updated = self.store.update_node(node_id, |node| {
            node.capabilities = caps.clone();
            Ok(())
        })?;
        self.index.replace(node_id, &updated.capabilities);
        Ok(updated)
    }

    /// Physically remove a node record and its index entries.
    pub fn deregister(
        &self,
        node_id: &NodeId,
        auth_data: Option<&AuthData>,
    ) -> Result<(), GridxError> {
        self.check_auth(node_id, "deregister", AuthLevel::Admin, auth_data)?;
        if !self.store.remove_node(node_id)? {
            return Err(GridxError::NodeNotFound(node_id.to_string()));
        }
        self.index.remove(node_id);
        self.auth.revoke(node_id);
        info!(node_id = %node_id, "node deregistered");
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get(&self, node_id: &NodeId) -> Result<NodeRecord, GridxError> {
        self.store
            .get_node(node_id)?
            .ok_or_else(|| GridxError::NodeNotFound(node_id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<NodeRecord>, GridxError> {
        self.store.iter_nodes()
    }

    /// Filtered node lookup, sorted by reputation descending.
    pub fn query(&self, query: &NodeQuery) -> Result<Vec<NodeRecord>, GridxError> {
        let mode = if query.match_all { CapabilityMatch::All } else { CapabilityMatch::Any };
        let candidates = self.index.lookup(&query.capabilities, mode);
        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(node) = self.store.get_node(&id)? else { continue };
            if let Some(min) = query.min_reputation {
                if node.reputation < min {
                    continue;
                }
            }
            if query.healthy_only && node.status != NodeStatus::Healthy {
                continue;
            }
            if let Some(min_hw) = &query.min_hardware {
                match &node.hardware {
                    Some(hw) if hw.meets(min_hw) => {}
                    _ => continue,
                }
            }
            out.push(node);
        }
        out.sort_by(|a, b| {
            b.reputation
                .partial_cmp(&a.reputation)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        Ok(out)
    }

    // ── Liveness ─────────────────────────────────────────────────────────────

    /// Mark every node silent past the offline threshold as offline. Returns
    /// the ids transitioned. This is the only automatic status transition;
    /// nodes are never deleted here.
    pub fn mark_stale_offline(&self, now: Timestamp) -> Result<Vec<NodeId>, GridxError> {
        let mut transitioned = Vec::new();
        for node in self.store.iter_nodes()? {
            if node.status == NodeStatus::Offline {
                continue;
            }
            if now - node.last_heartbeat > self.config.offline_threshold_s {
                self.store.update_node(&node.node_id, |n| {
                    n.status = NodeStatus::Offline;
                    Ok(())
                })?;
                info!(node_id = %node.node_id, "node marked offline after inactivity");
                transitioned.push(node.node_id);
            }
        }
        Ok(transitioned)
    }

    /// Background liveness reconciler. Sweeps on the configured cadence until
    /// shutdown; failures are logged and the loop continues.
    pub async fn run_liveness_reconciler(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = Duration::from_secs(self.config.liveness_sweep_s.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.mark_stale_offline(now) {
                        warn!(error = %e, "liveness sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("liveness reconciler stopping");
                        return;
                    }
                }
            }
        }
    }
}
