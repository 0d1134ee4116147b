use thiserror::Error;

/// Coarse error classification used at the API boundary.
///
/// Every [`GridxError`] variant maps onto exactly one kind; callers decide
/// retry behavior from the kind, never from the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Surfaced to the caller; no state change.
    Validation,
    /// Entity lookup miss. Surfaced; no retry.
    NotFound,
    /// Optimistic transition lost. Caller may re-query and retry.
    Conflict,
    /// Durable store failure. Mutation aborted atomically.
    Storage,
    /// Transient UDP or chain-RPC failure. Retry with backoff.
    Network,
    /// Signature missing or invalid.
    Unauthenticated,
    /// Authenticated but role insufficient.
    Forbidden,
    /// Operation exceeded its deadline.
    Timeout,
}

#[derive(Debug, Error)]
pub enum GridxError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("node id must not be empty")]
    EmptyNodeId,

    #[error("node address must not be empty")]
    EmptyAddress,

    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("{entity} {id} cannot {op} from status {from}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        op: &'static str,
        from: String,
    },

    #[error("invalid reputation event: {0}")]
    UnknownReputationEvent(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── NotFound ─────────────────────────────────────────────────────────────
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("contract not found: {0}")]
    ContractNotFound(String),

    // ── Conflict ─────────────────────────────────────────────────────────────
    #[error("{entity} {id} is {actual}, expected {expected}")]
    TransitionConflict {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("task {task_id} is assigned to {actual}, not {claimed}")]
    WrongAssignee {
        task_id: String,
        claimed: String,
        actual: String,
    },

    // ── Storage / serialization ──────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Network ──────────────────────────────────────────────────────────────
    #[error("network error: {0}")]
    Network(String),

    #[error("chain rpc error: {0}")]
    ChainRpc(String),

    // ── Auth ─────────────────────────────────────────────────────────────────
    #[error("authentication failed for node {0}")]
    Unauthenticated(String),

    #[error("node {node_id} is not permitted to {operation}")]
    Forbidden {
        node_id: String,
        operation: &'static str,
    },

    // ── Timeout ──────────────────────────────────────────────────────────────
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),
}

impl GridxError {
    pub fn kind(&self) -> ErrorKind {
        use GridxError::*;
        match self {
            EmptyNodeId
            | EmptyAddress
            | UnsupportedCurrency(_)
            | InvalidAmount(_)
            | ZeroAmount
            | InvalidTransition { .. }
            | UnknownReputationEvent(_)
            | InvalidConfig(_) => ErrorKind::Validation,

            NodeNotFound(_) | TaskNotFound(_) | ContractNotFound(_) => ErrorKind::NotFound,

            TransitionConflict { .. } | WrongAssignee { .. } => ErrorKind::Conflict,

            Storage(_) | Serialization(_) => ErrorKind::Storage,

            Network(_) | ChainRpc(_) => ErrorKind::Network,

            Unauthenticated(_) => ErrorKind::Unauthenticated,
            Forbidden { .. } => ErrorKind::Forbidden,

            Timeout(_) => ErrorKind::Timeout,
        }
    }
}
