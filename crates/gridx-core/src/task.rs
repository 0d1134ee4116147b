use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::Amount;
use crate::types::{ContractId, NodeId, TaskId, Timestamp};

// ── TaskPriority ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    /// Scheduling rank: urgent first. Lower sorts earlier.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Urgent => 1,
            TaskPriority::High => 2,
            TaskPriority::Normal => 3,
            TaskPriority::Low => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── TaskStatus ───────────────────────────────────────────────────────────────

/// Task lifecycle: `pending → assigned → running → (completed|failed|timeout)`
/// plus `pending → cancelled`. Terminal statuses never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Task ─────────────────────────────────────────────────────────────────────

/// A unit of buyer-submitted work. `payload` and `result` are opaque JSON
/// text; the coordination plane never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: String,
    pub payload: String,
    pub priority: TaskPriority,
    /// Wall-clock execution budget in seconds.
    pub max_execution_time: u64,
    pub required_capabilities: BTreeSet<String>,
    pub reward: Amount,
    pub submitter_id: String,
    pub escrow_id: Option<ContractId>,
    /// Non-null exactly when status ∈ {assigned, running, completed, failed, timeout}.
    pub assigned_node_id: Option<NodeId>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

// ── TaskResultRecord ─────────────────────────────────────────────────────────

/// Persisted alongside a completed task; verification happens out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultRecord {
    pub result_id: Uuid,
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub result_data: String,
    pub execution_time_secs: f64,
    pub verification_status: String,
    pub created_at: Timestamp,
}
