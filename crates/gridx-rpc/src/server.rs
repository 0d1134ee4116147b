use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use gridx_core::config::RpcSection;
use gridx_core::currency::{Amount, Currency};
use gridx_core::error::{ErrorKind, GridxError};
use gridx_core::escrow::{EscrowContract, EscrowStatus, EscrowTransaction, EscrowType};
use gridx_core::node::{HardwareProfile, NodeRecord};
use gridx_core::reputation::ReputationEventKind;
use gridx_core::task::{Task, TaskPriority};
use gridx_core::types::{ContractId, NodeId, TaskId};
use gridx_escrow::EscrowService;
use gridx_p2p::PresenceProtocol;
use gridx_registry::{NodeQuery, NodeRegistry};
use gridx_scheduler::TaskScheduler;

use crate::api::GridxApiServer;
use crate::types::{
    RpcCapabilityValidation, RpcEscrow, RpcEscrowCreation, RpcEscrowTransaction, RpcHardware,
    RpcNode, RpcNodeQuery, RpcReputationUpdate, RpcTask, RpcTaskSubmission,
};

/// Map an error kind onto a JSON-RPC error code.
fn rpc_err(e: GridxError) -> ErrorObject<'static> {
    let code = match e.kind() {
        ErrorKind::Validation => -32602,
        ErrorKind::NotFound => -32001,
        ErrorKind::Conflict => -32002,
        ErrorKind::Storage => -32603,
        ErrorKind::Network => -32003,
        ErrorKind::Unauthenticated => -32004,
        ErrorKind::Forbidden => -32005,
        ErrorKind::Timeout => -32006,
    };
    ErrorObject::owned(code, e.to_string(), None::<()>)
}

fn invalid(msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(-32602, msg.into(), None::<()>)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub registry: Arc<NodeRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    pub escrow: Arc<EscrowService>,
    /// Present when the node runs the presence protocol.
    pub p2p: Option<Arc<PresenceProtocol>>,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server as configured. Returns a handle to stop it.
    pub async fn start(self, config: &RpcSection) -> anyhow::Result<ServerHandle> {
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .with_context(|| format!("parsing rpc listen addr {}", config.listen_addr))?;

        // Browser dashboards need the permissive headers; deployments that
        // front the node themselves can turn them off.
        let cors = config.allow_cors.then(|| {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        });
        let middleware = tower::ServiceBuilder::new().option_layer(cors);

        let handle = Server::builder()
            .set_http_middleware(middleware)
            .build(addr)
            .await
            .with_context(|| format!("binding rpc server on {addr}"))?
            .start(self.into_rpc());
        info!(%addr, cors = config.allow_cors, "RPC server listening");
        Ok(handle)
    }
}

// ── DTO conversions ──────────────────────────────────────────────────────────

fn node_to_rpc(node: NodeRecord) -> RpcNode {
    RpcNode {
        node_id: node.node_id.to_string(),
        address: node.address,
        capabilities: node.capabilities.into_iter().collect(),
        reputation: node.reputation,
        status: node.status.as_str().to_string(),
        last_heartbeat: node.last_heartbeat,
        registered_at: node.registered_at,
        hardware: node.hardware.map(|h| RpcHardware {
            cpu_cores: h.cpu_cores,
            memory_gb: h.memory_gb,
            storage_gb: h.storage_gb,
            gpu: h.gpu,
        }),
        public_key: node.public_key,
    }
}

fn task_to_rpc(task: Task) -> RpcTask {
    let payload = serde_json::from_str(&task.payload)
        .unwrap_or(serde_json::Value::String(task.payload.clone()));
    let result = task
        .result
        .as_ref()
        .map(|r| serde_json::from_str(r).unwrap_or(serde_json::Value::String(r.clone())));
    RpcTask {
        task_id: task.task_id.to_string(),
        task_type: task.task_type,
        payload,
        priority: task.priority.as_str().to_string(),
        max_execution_time: task.max_execution_time,
        required_capabilities: task.required_capabilities.into_iter().collect(),
        reward: task.reward.to_decimal_string(),
        currency: task.reward.currency().symbol().to_string(),
        submitter_id: task.submitter_id,
        escrow_id: task.escrow_id.map(|id| id.to_string()),
        assigned_node_id: task.assigned_node_id.map(|id| id.to_string()),
        status: task.status.as_str().to_string(),
        result,
        error_message: task.error_message,
        created_at: task.created_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
    }
}

fn escrow_to_rpc(contract: EscrowContract) -> RpcEscrow {
    RpcEscrow {
        contract_id: contract.contract_id.to_string(),
        escrow_type: contract.escrow_type.as_str().to_string(),
        buyer_id: contract.buyer_id,
        seller_id: contract.seller_id,
        amount: contract.amount.to_decimal_string(),
        currency: contract.amount.currency().symbol().to_string(),
        service_id: contract.service_id,
        description: contract.description,
        terms: contract.terms,
        status: contract.status.as_str().to_string(),
        dispute_reason: contract.dispute_reason,
        created_at: contract.created_at,
        funded_at: contract.funded_at,
        started_at: contract.started_at,
        completed_at: contract.completed_at,
    }
}

fn tx_to_rpc(tx: EscrowTransaction) -> RpcEscrowTransaction {
    RpcEscrowTransaction {
        transaction_id: tx.transaction_id.to_string(),
        contract_id: tx.contract_id.to_string(),
        transaction_type: tx.kind.as_str().to_string(),
        amount: tx.amount.to_decimal_string(),
        currency: tx.amount.currency().symbol().to_string(),
        from_address: tx.from_address,
        to_address: tx.to_address,
        tx_hash: tx.tx_hash,
        status: tx.status,
        created_at: tx.created_at,
    }
}

// ── Parameter parsing ────────────────────────────────────────────────────────

fn parse_task_id(s: &str) -> Result<TaskId, ErrorObject<'static>> {
    TaskId::from_str(s).map_err(|e| invalid(format!("invalid task id: {e}")))
}

fn parse_contract_id(s: &str) -> Result<ContractId, ErrorObject<'static>> {
    ContractId::from_str(s).map_err(|e| invalid(format!("invalid contract id: {e}")))
}

fn parse_priority(s: &str) -> Result<TaskPriority, ErrorObject<'static>> {
    match s {
        "low" => Ok(TaskPriority::Low),
        "normal" => Ok(TaskPriority::Normal),
        "high" => Ok(TaskPriority::High),
        "urgent" => Ok(TaskPriority::Urgent),
        other => Err(invalid(format!("invalid priority: {other}"))),
    }
}

fn parse_escrow_type(s: &str) -> Result<EscrowType, ErrorObject<'static>> {
    match s {
        "service_payment" => Ok(EscrowType::ServicePayment),
        "api_usage" => Ok(EscrowType::ApiUsage),
        "task_execution" => Ok(EscrowType::TaskExecution),
        "subscription" => Ok(EscrowType::Subscription),
        other => Err(invalid(format!("invalid escrow type: {other}"))),
    }
}

fn parse_escrow_status(s: &str) -> Result<EscrowStatus, ErrorObject<'static>> {
    match s {
        "pending" => Ok(EscrowStatus::Pending),
        "funded" => Ok(EscrowStatus::Funded),
        "in_progress" => Ok(EscrowStatus::InProgress),
        "completed" => Ok(EscrowStatus::Completed),
        "disputed" => Ok(EscrowStatus::Disputed),
        "refunded" => Ok(EscrowStatus::Refunded),
        "cancelled" => Ok(EscrowStatus::Cancelled),
        other => Err(invalid(format!("invalid escrow status: {other}"))),
    }
}

fn parse_amount(amount: &str, currency: &str) -> Result<Amount, ErrorObject<'static>> {
    let currency = Currency::from_str(currency).map_err(rpc_err)?;
    Amount::parse(amount, currency).map_err(rpc_err)
}

fn caps_set(caps: Vec<String>) -> BTreeSet<String> {
    caps.into_iter().collect()
}

// ── RPC implementation ───────────────────────────────────────────────────────

#[async_trait]
impl GridxApiServer for RpcServer {
    // ── Registry ─────────────────────────────────────────────────────────────

    async fn register_node(
        &self,
        node_id: String,
        address: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode> {
        let record = self
            .state
            .registry
            .register(
                NodeId::new(node_id),
                address,
                caps_set(capabilities),
                None,
                Default::default(),
                None,
                now(),
            )
            .map_err(rpc_err)?;
        Ok(node_to_rpc(record))
    }

    async fn get_nodes(&self) -> RpcResult<Vec<RpcNode>> {
        let nodes = self.state.registry.list().map_err(rpc_err)?;
        Ok(nodes.into_iter().map(node_to_rpc).collect())
    }

    async fn get_node(&self, node_id: String) -> RpcResult<Option<RpcNode>> {
        match self.state.registry.get(&NodeId::new(node_id)) {
            Ok(node) => Ok(Some(node_to_rpc(node))),
            Err(GridxError::NodeNotFound(_)) => Ok(None),
            Err(e) => Err(rpc_err(e).into()),
        }
    }

    async fn heartbeat(&self, node_id: String) -> RpcResult<bool> {
        self.state
            .registry
            .heartbeat(&NodeId::new(node_id), None, now())
            .map_err(rpc_err)?;
        Ok(true)
    }

    async fn update_reputation(
        &self,
        node_id: String,
        event_type: String,
        custom_delta: Option<f64>,
    ) -> RpcResult<RpcReputationUpdate> {
        let event = ReputationEventKind::from_str(&event_type).map_err(rpc_err)?;
        let update = self
            .state
            .registry
            .update_reputation(&NodeId::new(node_id), event, custom_delta, None)
            .map_err(rpc_err)?;
        Ok(RpcReputationUpdate {
            node_id: update.node_id,
            event: update.event,
            old_reputation: update.old_reputation,
            new_reputation: update.new_reputation,
            delta: update.delta,
            clamped: update.clamped,
            rule_applied: update.rule_applied,
        })
    }

    async fn add_capabilities(
        &self,
        node_id: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode> {
        let record = self
            .state
            .registry
            .add_capabilities(&NodeId::new(node_id), caps_set(capabilities), None)
            .map_err(rpc_err)?;
        Ok(node_to_rpc(record))
    }

    async fn remove_capabilities(
        &self,
        node_id: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode> {
        let record = self
            .state
            .registry
            .remove_capabilities(&NodeId::new(node_id), caps_set(capabilities), None)
            .map_err(rpc_err)?;
        Ok(node_to_rpc(record))
    }

    async fn update_capabilities(
        &self,
        node_id: String,
        capabilities: Vec<String>,
    ) -> RpcResult<RpcNode> {
        let record = self
            .state
            .registry
            .replace_capabilities(&NodeId::new(node_id), caps_set(capabilities), None)
            .map_err(rpc_err)?;
        Ok(node_to_rpc(record))
    }

    async fn get_nodes_by_capability(&self, capability: String) -> RpcResult<Vec<RpcNode>> {
        let query = NodeQuery {
            capabilities: caps_set(vec![capability]),
            match_all: true,
            ..NodeQuery::default()
        };
        let nodes = self.state.registry.query(&query).map_err(rpc_err)?;
        Ok(nodes.into_iter().map(node_to_rpc).collect())
    }

    async fn query_nodes(&self, query: RpcNodeQuery) -> RpcResult<Vec<RpcNode>> {
        let node_query = NodeQuery {
            capabilities: caps_set(query.capabilities),
            match_all: query.match_all,
            min_reputation: query.min_reputation,
            healthy_only: query.healthy_only,
            min_hardware: query.min_hardware.map(|h| HardwareProfile {
                cpu_cores: h.cpu_cores,
                memory_gb: h.memory_gb,
                storage_gb: h.storage_gb,
                gpu: h.gpu,
            }),
        };
        let nodes = self.state.registry.query(&node_query).map_err(rpc_err)?;
        Ok(nodes.into_iter().map(node_to_rpc).collect())
    }

    async fn capability_statistics(&self) -> RpcResult<serde_json::Value> {
        let stats = self.state.registry.capability_index().stats();
        serde_json::to_value(stats).map_err(|e| invalid(e.to_string()).into())
    }

    async fn available_capabilities(&self) -> RpcResult<Vec<String>> {
        Ok(self.state.registry.capability_index().standard_capabilities())
    }

    async fn validate_capability(&self, capability: String) -> RpcResult<RpcCapabilityValidation> {
        let v = self.state.registry.capability_index().validate(&capability);
        Ok(RpcCapabilityValidation {
            capability: v.capability,
            well_formed: v.well_formed,
            is_standard: v.is_standard,
        })
    }

    async fn deregister_node(&self, node_id: String) -> RpcResult<bool> {
        self.state
            .registry
            .deregister(&NodeId::new(node_id), None)
            .map_err(rpc_err)?;
        Ok(true)
    }

    async fn network_stats(&self) -> RpcResult<serde_json::Value> {
        match &self.state.p2p {
            Some(p2p) => serde_json::to_value(p2p.peers().stats())
                .map_err(|e| invalid(e.to_string()).into()),
            None => Ok(serde_json::json!(null)),
        }
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    async fn submit_task(&self, submission: RpcTaskSubmission) -> RpcResult<RpcTask> {
        let priority = parse_priority(&submission.priority)?;
        let reward = parse_amount(&submission.reward, &submission.currency)?;
        let escrow_id = submission
            .escrow_id
            .as_deref()
            .map(parse_contract_id)
            .transpose()?;
        let payload = submission.payload.to_string();
        let task = self
            .state
            .scheduler
            .submit(
                &submission.task_type,
                &payload,
                priority,
                submission.max_execution_time,
                caps_set(submission.required_capabilities),
                reward,
                &submission.submitter_id,
                escrow_id,
                now(),
            )
            .map_err(rpc_err)?;
        Ok(task_to_rpc(task))
    }

    async fn available_tasks(&self, capabilities: Vec<String>) -> RpcResult<Vec<RpcTask>> {
        let tasks = self
            .state
            .scheduler
            .available_for(&caps_set(capabilities))
            .map_err(rpc_err)?;
        Ok(tasks.into_iter().map(task_to_rpc).collect())
    }

    async fn assign_task(&self, task_id: String, node_id: String) -> RpcResult<RpcTask> {
        let task = self
            .state
            .scheduler
            .assign(&parse_task_id(&task_id)?, &NodeId::new(node_id), now())
            .map_err(rpc_err)?;
        Ok(task_to_rpc(task))
    }

    async fn start_task(&self, task_id: String, node_id: String) -> RpcResult<RpcTask> {
        let task = self
            .state
            .scheduler
            .start(&parse_task_id(&task_id)?, &NodeId::new(node_id), now())
            .map_err(rpc_err)?;
        Ok(task_to_rpc(task))
    }

    async fn complete_task(
        &self,
        task_id: String,
        node_id: String,
        result: serde_json::Value,
        execution_time: f64,
    ) -> RpcResult<RpcTask> {
        let task = self
            .state
            .scheduler
            .complete(
                &parse_task_id(&task_id)?,
                &NodeId::new(node_id),
                &result.to_string(),
                execution_time,
                now(),
            )
            .await
            .map_err(rpc_err)?;
        Ok(task_to_rpc(task))
    }

    async fn fail_task(
        &self,
        task_id: String,
        node_id: String,
        error_message: String,
    ) -> RpcResult<RpcTask> {
        let task = self
            .state
            .scheduler
            .fail(&parse_task_id(&task_id)?, &NodeId::new(node_id), &error_message, now())
            .map_err(rpc_err)?;
        Ok(task_to_rpc(task))
    }

    async fn get_task(&self, task_id: String) -> RpcResult<Option<RpcTask>> {
        match self.state.scheduler.get(&parse_task_id(&task_id)?) {
            Ok(task) => Ok(Some(task_to_rpc(task))),
            Err(GridxError::TaskNotFound(_)) => Ok(None),
            Err(e) => Err(rpc_err(e).into()),
        }
    }

    async fn cancel_task(&self, task_id: String) -> RpcResult<RpcTask> {
        let task = self
            .state
            .scheduler
            .cancel(&parse_task_id(&task_id)?, now())
            .map_err(rpc_err)?;
        Ok(task_to_rpc(task))
    }

    async fn task_statistics(&self) -> RpcResult<serde_json::Value> {
        let stats = self.state.scheduler.statistics().map_err(rpc_err)?;
        serde_json::to_value(stats).map_err(|e| invalid(e.to_string()).into())
    }

    // ── Escrow ───────────────────────────────────────────────────────────────

    async fn create_escrow(&self, creation: RpcEscrowCreation) -> RpcResult<RpcEscrow> {
        let escrow_type = parse_escrow_type(&creation.escrow_type)?;
        let amount = parse_amount(&creation.amount, &creation.currency)?;
        let contract = self
            .state
            .escrow
            .create(
                escrow_type,
                &creation.buyer_id,
                &creation.seller_id,
                amount,
                creation.service_id,
                &creation.description,
                &creation.terms,
                now(),
            )
            .map_err(rpc_err)?;
        Ok(escrow_to_rpc(contract))
    }

    async fn fund_escrow(&self, contract_id: String, tx_hash: String) -> RpcResult<RpcEscrow> {
        let contract = self
            .state
            .escrow
            .fund(&parse_contract_id(&contract_id)?, &tx_hash, now())
            .map_err(rpc_err)?;
        Ok(escrow_to_rpc(contract))
    }

    async fn start_escrow(&self, contract_id: String) -> RpcResult<RpcEscrow> {
        let contract = self
            .state
            .escrow
            .start(&parse_contract_id(&contract_id)?, now())
            .map_err(rpc_err)?;
        Ok(escrow_to_rpc(contract))
    }

    async fn complete_escrow(&self, contract_id: String, tx_hash: String) -> RpcResult<RpcEscrow> {
        let contract = self
            .state
            .escrow
            .complete(&parse_contract_id(&contract_id)?, &tx_hash, now())
            .map_err(rpc_err)?;
        Ok(escrow_to_rpc(contract))
    }

    async fn dispute_escrow(
        &self,
        contract_id: String,
        initiator_id: String,
        reason: String,
        evidence: Option<String>,
    ) -> RpcResult<RpcEscrow> {
        let contract = self
            .state
            .escrow
            .dispute(&parse_contract_id(&contract_id)?, &initiator_id, &reason, evidence, now())
            .map_err(rpc_err)?;
        Ok(escrow_to_rpc(contract))
    }

    async fn refund_escrow(&self, contract_id: String, tx_hash: String) -> RpcResult<RpcEscrow> {
        let contract = self
            .state
            .escrow
            .refund(&parse_contract_id(&contract_id)?, &tx_hash, now())
            .map_err(rpc_err)?;
        Ok(escrow_to_rpc(contract))
    }

    async fn get_escrow(&self, contract_id: String) -> RpcResult<Option<RpcEscrow>> {
        match self.state.escrow.get(&parse_contract_id(&contract_id)?) {
            Ok(contract) => Ok(Some(escrow_to_rpc(contract))),
            Err(GridxError::ContractNotFound(_)) => Ok(None),
            Err(e) => Err(rpc_err(e).into()),
        }
    }

    async fn get_escrow_transactions(
        &self,
        contract_id: String,
    ) -> RpcResult<Vec<RpcEscrowTransaction>> {
        let txs = self
            .state
            .escrow
            .transactions(&parse_contract_id(&contract_id)?)
            .map_err(rpc_err)?;
        Ok(txs.into_iter().map(tx_to_rpc).collect())
    }

    async fn list_escrows_by_user(
        &self,
        user_id: String,
        status: Option<String>,
    ) -> RpcResult<Vec<RpcEscrow>> {
        let status = status.as_deref().map(parse_escrow_status).transpose()?;
        let contracts = self
            .state
            .escrow
            .list_by_user(&user_id, status)
            .map_err(rpc_err)?;
        Ok(contracts.into_iter().map(escrow_to_rpc).collect())
    }

    async fn escrow_statistics(&self) -> RpcResult<serde_json::Value> {
        let stats = self.state.escrow.statistics().map_err(rpc_err)?;
        serde_json::to_value(stats).map_err(|e| invalid(e.to_string()).into())
    }
}
