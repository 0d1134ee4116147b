pub mod config;
pub mod constants;
pub mod currency;
pub mod error;
pub mod escrow;
pub mod node;
pub mod reputation;
pub mod task;
pub mod types;

pub use config::GridxConfig;
pub use currency::{Amount, Currency};
pub use error::{ErrorKind, GridxError};
pub use escrow::{
    EscrowContract, EscrowDispute, EscrowStatus, EscrowTransaction, EscrowType, TransactionKind,
};
pub use node::{HardwareProfile, NodeRecord, NodeStatus};
pub use reputation::ReputationEventKind;
pub use task::{Task, TaskPriority, TaskResultRecord, TaskStatus};
pub use types::{ContractId, NodeId, TaskId, Timestamp};
