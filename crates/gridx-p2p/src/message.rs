use rand::RngCore;
use serde::{Deserialize, Serialize};

use gridx_core::constants::MAX_DATAGRAM_BYTES;
use gridx_core::error::GridxError;

/// The seven presence message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Hello,
    Goodbye,
    Ping,
    Pong,
    HealthBroadcast,
    NodeRegister,
    NodeUpdate,
}

/// A presence datagram. The wire format is a JSON object:
///
/// ```json
/// {"message_type": "hello", "sender_id": "...", "sender_address": "...",
///  "timestamp": 1700000000.25, "message_id": "16-hex", "payload": {...}}
/// ```
///
/// `message_id` makes loop detection possible on a broadcast medium; repeats
/// within the history window are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub message_type: MessageType,
    pub sender_id: String,
    pub sender_address: String,
    /// Seconds since epoch; fractional for sub-second ordering hints only.
    pub timestamp: f64,
    pub message_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PresenceMessage {
    pub fn new(
        message_type: MessageType,
        sender_id: &str,
        sender_address: &str,
        timestamp: f64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_type,
            sender_id: sender_id.to_string(),
            sender_address: sender_address.to_string(),
            timestamp,
            message_id: generate_message_id(sender_id, timestamp),
            payload,
        }
    }

    /// Serialize for the wire. Fails if the datagram would exceed the
    /// protocol's 4096-byte ceiling.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GridxError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| GridxError::Serialization(e.to_string()))?;
        if bytes.len() > MAX_DATAGRAM_BYTES {
            return Err(GridxError::Serialization(format!(
                "datagram of {} bytes exceeds {MAX_DATAGRAM_BYTES}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GridxError> {
        serde_json::from_slice(bytes).map_err(|e| GridxError::Serialization(e.to_string()))
    }
}

/// 16-hex message id derived from sender, timestamp, and fresh randomness.
fn generate_message_id(sender_id: &str, timestamp: f64) -> String {
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    let seed = format!("{sender_id}:{timestamp}:{}", hex::encode(nonce));
    blake3::hash(seed.as_bytes()).to_hex()[..16].to_string()
}

// ── Typed payloads ───────────────────────────────────────────────────────────

/// Payload of `hello` and `health_broadcast` messages.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HelloPayload {
    pub node_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub reputation: f64,
    #[serde(default = "unknown_status")]
    pub health_status: String,
}

fn unknown_status() -> String {
    "unknown".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        let msg = PresenceMessage::new(
            MessageType::Hello,
            "n1",
            "0.0.0.0:9334",
            1_700_000_000.5,
            serde_json::json!({"node_id": "n1", "capabilities": ["python"], "reputation": 0.0, "health_status": "healthy"}),
        );
        let bytes = msg.to_bytes().unwrap();
        let decoded = PresenceMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.message_type, MessageType::Hello);
        assert_eq!(decoded.sender_id, "n1");
        assert_eq!(decoded.message_id, msg.message_id);
        assert_eq!(decoded.message_id.len(), 16);

        let payload: HelloPayload = serde_json::from_value(decoded.payload).unwrap();
        assert_eq!(payload.capabilities, vec!["python"]);
    }

    #[test]
    fn type_names_match_the_wire_vocabulary() {
        for (t, name) in [
            (MessageType::Hello, "hello"),
            (MessageType::Goodbye, "goodbye"),
            (MessageType::Ping, "ping"),
            (MessageType::Pong, "pong"),
            (MessageType::HealthBroadcast, "health_broadcast"),
            (MessageType::NodeRegister, "node_register"),
            (MessageType::NodeUpdate, "node_update"),
        ] {
            assert_eq!(serde_json::to_value(t).unwrap(), serde_json::json!(name));
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = br#"{"message_type":"teleport","sender_id":"x","sender_address":"a","timestamp":1.0,"message_id":"0000000000000000","payload":{}}"#;
        assert!(PresenceMessage::from_bytes(raw).is_err());
    }

    #[test]
    fn message_ids_are_unique_per_send() {
        let a = PresenceMessage::new(MessageType::Ping, "n1", "a", 1.0, serde_json::json!({}));
        let b = PresenceMessage::new(MessageType::Ping, "n1", "a", 1.0, serde_json::json!({}));
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn oversized_datagram_rejected() {
        let blob = "x".repeat(MAX_DATAGRAM_BYTES);
        let msg = PresenceMessage::new(
            MessageType::Hello,
            "n1",
            "a",
            1.0,
            serde_json::json!({ "blob": blob }),
        );
        assert!(msg.to_bytes().is_err());
    }
}
