use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    RpcCapabilityValidation, RpcEscrow, RpcEscrowCreation, RpcEscrowTransaction, RpcNode,
    RpcNodeQuery, RpcReputationUpdate, RpcTask, RpcTaskSubmission,
};

/// GridX JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "gridx_" via `namespace = "gridx"`.
#[rpc(server, namespace = "gridx")]
pub trait GridxApi {
    // ── Registry ─────────────────────────────────────────────────────────────

    /// Register a node (or update it when the id already exists).
    #[method(name = "registerNode")]
    async fn register_node(
        &self,
        node_id: String,
        address: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode>;

    /// All registered nodes.
    #[method(name = "getNodes")]
    async fn get_nodes(&self) -> RpcResult<Vec<RpcNode>>;

    /// One node by id, or null.
    #[method(name = "getNode")]
    async fn get_node(&self, node_id: String) -> RpcResult<Option<RpcNode>>;

    /// Refresh a node's liveness timestamp.
    #[method(name = "heartbeat")]
    async fn heartbeat(&self, node_id: String) -> RpcResult<bool>;

    /// Apply a reputation event (optionally with a custom delta).
    #[method(name = "updateReputation")]
    async fn update_reputation(
        &self,
        node_id: String,
        event_type: String,
        custom_delta: Option<f64>,
    ) -> RpcResult<RpcReputationUpdate>;

    /// Add capability tags to a node.
    #[method(name = "addCapabilities")]
    async fn add_capabilities(
        &self,
        node_id: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode>;

    /// Remove capability tags from a node.
    #[method(name = "removeCapabilities")]
    async fn remove_capabilities(
        &self,
        node_id: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode>;

    /// Replace a node's capability set.
    #[method(name = "updateCapabilities")]
    async fn update_capabilities(
        &self,
        node_id: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode>;

    /// Nodes carrying one capability tag.
    #[method(name = "getNodesByCapability")]
    async fn get_nodes_by_capability(&self, capability: String) -> RpcResult<Vec<RpcNode>>;

    /// Filtered node query, sorted by reputation descending.
    #[method(name = "queryNodes")]
    async fn query_nodes(&self, query: RpcNodeQuery) -> RpcResult<Vec<RpcNode>>;

    /// Per-capability node counts and the most common tags.
    #[method(name = "capabilityStatistics")]
    async fn capability_statistics(&self) -> RpcResult<serde_json::Value>;

    /// The standard capability vocabulary.
    #[method(name = "availableCapabilities")]
    async fn available_capabilities(&self) -> RpcResult<Vec<String>>;

    /// Syntax/vocabulary check for a capability tag.
    #[method(name = "validateCapability")]
    async fn validate_capability(&self, capability: String) -> RpcResult<RpcCapabilityValidation>;

    /// Remove a node record entirely.
    #[method(name = "deregisterNode")]
    async fn deregister_node(&self, node_id: String) -> RpcResult<bool>;

    /// Current P2P neighborhood statistics.
    #[method(name = "networkStats")]
    async fn network_stats(&self) -> RpcResult<serde_json::Value>;

    // ── Tasks ────────────────────────────────────────────────────────────────

    /// Submit a task for execution.
    #[method(name = "submitTask")]
    async fn submit_task(&self, submission: RpcTaskSubmission) -> RpcResult<RpcTask>;

    /// Pending tasks a node with these capabilities could take.
    #[method(name = "availableTasks")]
    async fn available_tasks(&self, capabilities: Vec<String>) -> RpcResult<Vec<RpcTask>>;

    /// Claim a pending task for a node.
    #[method(name = "assignTask")]
    async fn assign_task(&self, task_id: String, node_id: String) -> RpcResult<RpcTask>;

    /// Begin execution of an assigned task.
    #[method(name = "startTask")]
    async fn start_task(&self, task_id: String, node_id: String) -> RpcResult<RpcTask>;

    /// Report successful completion with the result payload.
    #[method(name = "completeTask")]
    async fn complete_task(
        &self,
        task_id: String,
        node_id: String,
        result: serde_json::Value,
        execution_time: f64,
    ) -> RpcResult<RpcTask>;

    /// Report execution failure.
    #[method(name = "failTask")]
    async fn fail_task(
        &self,
        task_id: String,
        node_id: String,
        error_message: String,
    ) -> RpcResult<RpcTask>;

    /// One task by id.
    #[method(name = "getTask")]
    async fn get_task(&self, task_id: String) -> RpcResult<Option<RpcTask>>;

    /// Cancel a still-pending task.
    #[method(name = "cancelTask")]
    async fn cancel_task(&self, task_id: String) -> RpcResult<RpcTask>;

    /// Aggregate task statistics.
    #[method(name = "taskStatistics")]
    async fn task_statistics(&self) -> RpcResult<serde_json::Value>;

    // ── Escrow ───────────────────────────────────────────────────────────────

    /// Create an escrow contract in `pending`.
    #[method(name = "createEscrow")]
    async fn create_escrow(&self, creation: RpcEscrowCreation) -> RpcResult<RpcEscrow>;

    /// Mark a contract funded with the chain transaction hash.
    #[method(name = "fundEscrow")]
    async fn fund_escrow(&self, contract_id: String, tx_hash: String) -> RpcResult<RpcEscrow>;

    /// Mark work started on a funded contract.
    #[method(name = "startEscrow")]
    async fn start_escrow(&self, contract_id: String) -> RpcResult<RpcEscrow>;

    /// Settle a contract: seller payment plus community share.
    #[method(name = "completeEscrow")]
    async fn complete_escrow(&self, contract_id: String, tx_hash: String) -> RpcResult<RpcEscrow>;

    /// Open a dispute on a non-terminal contract.
    #[method(name = "disputeEscrow")]
    async fn dispute_escrow(
        &self,
        contract_id: String,
        initiator_id: String,
        reason: String,
        evidence: Option<String>,
    ) -> RpcResult<RpcEscrow>;

    /// Refund a disputed (or administratively, funded/in-progress) contract.
    #[method(name = "refundEscrow")]
    async fn refund_escrow(&self, contract_id: String, tx_hash: String) -> RpcResult<RpcEscrow>;

    /// One contract by id.
    #[method(name = "getEscrow")]
    async fn get_escrow(&self, contract_id: String) -> RpcResult<Option<RpcEscrow>>;

    /// Fund movements recorded against a contract.
    #[method(name = "getEscrowTransactions")]
    async fn get_escrow_transactions(
        &self,
        contract_id: String,
    ) -> RpcResult<Vec<RpcEscrowTransaction>>;

    /// Contracts where the user is buyer or seller, newest first.
    #[method(name = "listEscrowsByUser")]
    async fn list_escrows_by_user(
        &self,
        user_id: String,
        status: Option<String>,
    ) -> RpcResult<Vec<RpcEscrow>>;

    /// Aggregate escrow statistics.
    #[method(name = "escrowStatistics")]
    async fn escrow_statistics(&self) -> RpcResult<serde_json::Value>;
}
