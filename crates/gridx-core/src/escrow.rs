use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::Amount;
use crate::types::{ContractId, Timestamp};

// ── EscrowType ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowType {
    ServicePayment,
    ApiUsage,
    TaskExecution,
    Subscription,
}

impl EscrowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowType::ServicePayment => "service_payment",
            EscrowType::ApiUsage => "api_usage",
            EscrowType::TaskExecution => "task_execution",
            EscrowType::Subscription => "subscription",
        }
    }
}

impl fmt::Display for EscrowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── EscrowStatus ─────────────────────────────────────────────────────────────

/// Contract lifecycle:
///
/// ```text
/// pending ──fund──► funded ──start──► in_progress ──complete──► completed
///    │                 │                   │
///    └──cancel──► cancelled                └──dispute──► disputed ──refund──► refunded
/// ```
///
/// `dispute` is accepted from any non-terminal state; `refund` also accepts
/// `funded` and `in_progress` for administrative callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Funded,
    InProgress,
    Completed,
    Disputed,
    Refunded,
    Cancelled,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Completed | EscrowStatus::Refunded | EscrowStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Funded => "funded",
            EscrowStatus::InProgress => "in_progress",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── EscrowContract ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowContract {
    pub contract_id: ContractId,
    pub escrow_type: EscrowType,
    pub buyer_id: String,
    pub seller_id: String,
    pub amount: Amount,
    pub service_id: Option<String>,
    pub description: String,
    pub terms: String,
    pub status: EscrowStatus,
    pub dispute_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub funded_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

// ── EscrowTransaction ────────────────────────────────────────────────────────

/// Kinds of fund movement recorded against a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Funding,
    SellerPayment,
    CommunityFund,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Funding => "funding",
            TransactionKind::SellerPayment => "seller_payment",
            TransactionKind::CommunityFund => "community_fund",
            TransactionKind::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fund movement on the external chain, recorded after the fact. The state
/// machine never broadcasts transactions itself; callers supply `tx_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub transaction_id: Uuid,
    pub contract_id: ContractId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub from_address: String,
    pub to_address: String,
    pub tx_hash: String,
    pub status: String,
    pub created_at: Timestamp,
}

// ── EscrowDispute ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowDispute {
    pub dispute_id: Uuid,
    pub contract_id: ContractId,
    pub initiator_id: String,
    pub reason: String,
    pub evidence: Option<String>,
    pub status: String,
    pub resolution: Option<String>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}
