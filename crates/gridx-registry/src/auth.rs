use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use gridx_core::error::GridxError;
use gridx_core::types::NodeId;

/// Privilege level attached to a node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    /// Can prove identity; may mutate its own record.
    Signed,
    /// May additionally deregister nodes and adjust other nodes' reputation.
    Admin,
}

/// Signature material accompanying a mutating registry call when auth mode is
/// enabled. `body` is the canonical JSON of the request; `signature` is the
/// hex keyed-BLAKE3 MAC of `body` under the node's key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthData {
    pub signature: String,
    pub body: String,
}

struct NodeIdentity {
    key: [u8; 32],
    level: AuthLevel,
}

/// Issues and verifies node identities.
///
/// Keys are 32-byte secrets shared with the node at mint time; the registry
/// stores only the derived key id on the node record. Identities live in
/// memory for the life of the process.
pub struct NodeAuthService {
    identities: Mutex<HashMap<NodeId, NodeIdentity>>,
}

impl NodeAuthService {
    pub fn new() -> Self {
        Self { identities: Mutex::new(HashMap::new()) }
    }

    /// Mint an identity for `node_id` at the given level, replacing any
    /// previous one. Returns `(secret_hex, key_id_hex)`; the secret goes to
    /// the node, the key id onto its registry record.
    pub fn generate_identity(&self, node_id: &NodeId, level: AuthLevel) -> (String, String) {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let key_id = blake3::hash(&key).to_hex().to_string();
        let mut identities = self.identities.lock().expect("auth identities lock poisoned");
        identities.insert(node_id.clone(), NodeIdentity { key, level });
        (hex::encode(key), key_id)
    }

    pub fn has_identity(&self, node_id: &NodeId) -> bool {
        let identities = self.identities.lock().expect("auth identities lock poisoned");
        identities.contains_key(node_id)
    }

    /// Public key id for a node's identity: BLAKE3 of its secret key.
    pub fn key_id(&self, node_id: &NodeId) -> Option<String> {
        let identities = self.identities.lock().expect("auth identities lock poisoned");
        identities
            .get(node_id)
            .map(|id| blake3::hash(&id.key).to_hex().to_string())
    }

    /// Compute the MAC a node would attach to `body`. Used by tests and by
    /// the node's own outbound authenticated calls.
    pub fn sign(&self, node_id: &NodeId, body: &str) -> Option<String> {
        let identities = self.identities.lock().expect("auth identities lock poisoned");
        identities
            .get(node_id)
            .map(|id| blake3::keyed_hash(&id.key, body.as_bytes()).to_hex().to_string())
    }

    /// Verify `auth` against the node's key. Missing identity or a bad MAC
    /// both fail closed.
    pub fn verify(&self, node_id: &NodeId, auth: &AuthData) -> Result<AuthLevel, GridxError> {
        let identities = self.identities.lock().expect("auth identities lock poisoned");
        let identity = identities
            .get(node_id)
            .ok_or_else(|| GridxError::Unauthenticated(node_id.to_string()))?;
        let expected = blake3::keyed_hash(&identity.key, auth.body.as_bytes());
        let given = hex::decode(&auth.signature)
            .map_err(|_| GridxError::Unauthenticated(node_id.to_string()))?;
        let given: [u8; 32] = given
            .try_into()
            .map_err(|_| GridxError::Unauthenticated(node_id.to_string()))?;
        // blake3::Hash comparison is constant-time.
        if blake3::Hash::from_bytes(given) != expected {
            return Err(GridxError::Unauthenticated(node_id.to_string()));
        }
        Ok(identity.level)
    }

    /// Check that `level` suffices for `operation`.
    pub fn authorize(
        node_id: &NodeId,
        level: AuthLevel,
        operation: &'static str,
        required: AuthLevel,
    ) -> Result<(), GridxError> {
        if level >= required {
            Ok(())
        } else {
            Err(GridxError::Forbidden { node_id: node_id.to_string(), operation })
        }
    }

    pub fn revoke(&self, node_id: &NodeId) -> bool {
        let mut identities = self.identities.lock().expect("auth identities lock poisoned");
        identities.remove(node_id).is_some()
    }
}

impl Default for NodeAuthService {
    fn default() -> Self {
        Self::new()
    }
}
