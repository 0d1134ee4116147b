use serde::{Deserialize, Serialize};

/// JSON-serializable node record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNode {
    pub node_id: String,
    pub address: String,
    pub capabilities: Vec<String>,
    pub reputation: f64,
    pub status: String,
    pub last_heartbeat: i64,
    pub registered_at: i64,
    pub hardware: Option<RpcHardware>,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcHardware {
    pub cpu_cores: u32,
    pub memory_gb: f64,
    pub storage_gb: f64,
    pub gpu: bool,
}

/// Filter for `gridx_queryNodes`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RpcNodeQuery {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub match_all: bool,
    pub min_reputation: Option<f64>,
    #[serde(default)]
    pub healthy_only: bool,
    pub min_hardware: Option<RpcHardware>,
}

/// JSON-serializable task. Amounts are decimal strings plus a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTask {
    pub task_id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: String,
    pub max_execution_time: u64,
    pub required_capabilities: Vec<String>,
    pub reward: String,
    pub currency: String,
    pub submitter_id: String,
    pub escrow_id: Option<String>,
    pub assigned_node_id: Option<String>,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Parameters of `gridx_submitTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTaskSubmission {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: String,
    pub max_execution_time: u64,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    pub reward: String,
    pub currency: String,
    pub submitter_id: String,
    pub escrow_id: Option<String>,
}

/// JSON-serializable escrow contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEscrow {
    pub contract_id: String,
    pub escrow_type: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub amount: String,
    pub currency: String,
    pub service_id: Option<String>,
    pub description: String,
    pub terms: String,
    pub status: String,
    pub dispute_reason: Option<String>,
    pub created_at: i64,
    pub funded_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Parameters of `gridx_createEscrow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEscrowCreation {
    pub escrow_type: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub amount: String,
    pub currency: String,
    pub service_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub terms: String,
}

/// JSON-serializable escrow fund movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEscrowTransaction {
    pub transaction_id: String,
    pub contract_id: String,
    pub transaction_type: String,
    pub amount: String,
    pub currency: String,
    pub from_address: String,
    pub to_address: String,
    pub tx_hash: String,
    pub status: String,
    pub created_at: i64,
}

/// Result of a capability validation probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCapabilityValidation {
    pub capability: String,
    pub well_formed: bool,
    pub is_standard: bool,
}

/// Result of a reputation event application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReputationUpdate {
    pub node_id: String,
    pub event: String,
    pub old_reputation: f64,
    pub new_reputation: f64,
    pub delta: f64,
    pub clamped: bool,
    pub rule_applied: bool,
}
