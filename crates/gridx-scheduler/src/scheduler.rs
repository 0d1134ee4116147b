use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gridx_chain::{retry_with_backoff, AdapterRegistry};
use gridx_core::config::SchedulerSection;
use gridx_core::currency::{Amount, Currency};
use gridx_core::error::GridxError;
use gridx_core::reputation::ReputationEventKind;
use gridx_core::task::{Task, TaskPriority, TaskResultRecord, TaskStatus};
use gridx_core::types::{ContractId, NodeId, TaskId, Timestamp};
use gridx_escrow::EscrowService;
use gridx_registry::NodeRegistry;
use gridx_store::Store;

/// Aggregate task figures.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub status_counts: BTreeMap<String, usize>,
    /// Rewards of completed tasks, decimal strings keyed by currency symbol.
    pub completed_rewards: BTreeMap<String, String>,
    pub avg_execution_time_secs: f64,
    pub success_rate: f64,
}

/// The task scheduler and state machine.
///
/// Transitions go through the store's transactional combinators, so two
/// nodes racing for the same task serialize and exactly one wins. Terminal
/// statuses are enforced here and never revisited.
pub struct TaskScheduler {
    store: Arc<Store>,
    registry: Arc<NodeRegistry>,
    escrow: Arc<EscrowService>,
    chains: Arc<AdapterRegistry>,
    config: SchedulerSection,
    supported: BTreeSet<Currency>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<NodeRegistry>,
        escrow: Arc<EscrowService>,
        chains: Arc<AdapterRegistry>,
        config: SchedulerSection,
    ) -> Self {
        let supported = chains.supported_currencies().into_iter().collect();
        Self { store, registry, escrow, chains, config, supported }
    }

    fn conflict(task: &Task, expected: &str) -> GridxError {
        GridxError::TransitionConflict {
            entity: "task",
            id: task.task_id.to_string(),
            expected: expected.into(),
            actual: task.status.to_string(),
        }
    }

    fn guard_assignee(task: &Task, node_id: &NodeId) -> Result<(), GridxError> {
        match &task.assigned_node_id {
            Some(assigned) if assigned == node_id => Ok(()),
            Some(assigned) => Err(GridxError::WrongAssignee {
                task_id: task.task_id.to_string(),
                claimed: node_id.to_string(),
                actual: assigned.to_string(),
            }),
            None => Err(GridxError::WrongAssignee {
                task_id: task.task_id.to_string(),
                claimed: node_id.to_string(),
                actual: "<unassigned>".into(),
            }),
        }
    }

    // ── Submission & selection ───────────────────────────────────────────────

    /// Accept a new task into `pending`.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &self,
        task_type: &str,
        payload: &str,
        priority: TaskPriority,
        max_execution_time: u64,
        required_capabilities: BTreeSet<String>,
        reward: Amount,
        submitter_id: &str,
        escrow_id: Option<ContractId>,
        now: Timestamp,
    ) -> Result<Task, GridxError> {
        if submitter_id.is_empty() {
            return Err(GridxError::EmptyNodeId);
        }
        if max_execution_time == 0 {
            return Err(GridxError::InvalidAmount("max_execution_time must be positive".into()));
        }
        if !self.supported.contains(&reward.currency()) {
            return Err(GridxError::UnsupportedCurrency(reward.currency().symbol().to_string()));
        }
        let task = Task {
            task_id: TaskId::generate(),
            task_type: task_type.to_string(),
            payload: payload.to_string(),
            priority,
            max_execution_time,
            required_capabilities,
            reward,
            submitter_id: submitter_id.to_string(),
            escrow_id,
            assigned_node_id: None,
            status: TaskStatus::Pending,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.store.put_task(&task)?;
        info!(task_id = %task.task_id, reward = %task.reward, priority = %task.priority, "task submitted");
        Ok(task)
    }

    /// Pending tasks a node with `capabilities` could take, most urgent
    /// first, FIFO within a priority.
    pub fn available_for(&self, capabilities: &BTreeSet<String>) -> Result<Vec<Task>, GridxError> {
        let mut tasks: Vec<Task> = self
            .store
            .iter_tasks()?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.required_capabilities.is_subset(capabilities))
            .collect();
        tasks.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(tasks)
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    /// CAS `pending → assigned`. Losing a race returns a conflict, not an
    /// error condition the caller should log loudly — re-query and move on.
    pub fn assign(&self, task_id: &TaskId, node_id: &NodeId, now: Timestamp) -> Result<Task, GridxError> {
        let node_id = node_id.clone();
        let task = self.store.update_task(task_id, |t| {
            if t.status != TaskStatus::Pending {
                return Err(Self::conflict(t, "pending"));
            }
            t.status = TaskStatus::Assigned;
            t.assigned_node_id = Some(node_id.clone());
            t.updated_at = now;
            Ok(())
        })?;
        info!(task_id = %task_id, node_id = %node_id, "task assigned");
        Ok(task)
    }

    /// CAS `assigned → running`, guarded by the assignee. Also moves the
    /// referenced escrow to `in_progress` when one is attached.
    pub fn start(&self, task_id: &TaskId, node_id: &NodeId, now: Timestamp) -> Result<Task, GridxError> {
        let node_id = node_id.clone();
        let task = self.store.update_task(task_id, |t| {
            if t.status != TaskStatus::Assigned {
                return Err(Self::conflict(t, "assigned"));
            }
            Self::guard_assignee(t, &node_id)?;
            t.status = TaskStatus::Running;
            t.started_at = Some(now);
            t.updated_at = now;
            Ok(())
        })?;
        info!(task_id = %task_id, node_id = %node_id, "task started");

        if let Some(escrow_id) = task.escrow_id {
            if let Err(e) = self.escrow.start(&escrow_id, now) {
                warn!(task_id = %task_id, escrow_id = %escrow_id, error = %e, "escrow start failed");
            }
        }
        Ok(task)
    }

    /// CAS `running → completed`; persists the result record atomically with
    /// the transition, then cascades: escrow settlement via the chain
    /// adapter, and a `task_success` reputation event for the node.
    pub async fn complete(
        &self,
        task_id: &TaskId,
        node_id: &NodeId,
        result: &str,
        duration_secs: f64,
        now: Timestamp,
    ) -> Result<Task, GridxError> {
        let node = node_id.clone();
        let result_owned = result.to_string();
        let record = TaskResultRecord {
            result_id: Uuid::new_v4(),
            task_id: *task_id,
            node_id: node_id.clone(),
            result_data: result.to_string(),
            execution_time_secs: duration_secs,
            verification_status: "pending".into(),
            created_at: now,
        };
        let task = self.store.update_task_with_result(
            task_id,
            |t| {
                if t.status != TaskStatus::Running {
                    return Err(Self::conflict(t, "running"));
                }
                Self::guard_assignee(t, &node)?;
                t.status = TaskStatus::Completed;
                t.result = Some(result_owned.clone());
                t.completed_at = Some(now);
                t.updated_at = now;
                Ok(())
            },
            &record,
        )?;
        info!(task_id = %task_id, node_id = %node_id, duration_secs, "task completed");

        if let Some(escrow_id) = task.escrow_id {
            self.settle_escrow(&escrow_id, now).await;
        }
        if let Err(e) =
            self.registry.update_reputation(node_id, ReputationEventKind::TaskSuccess, None, None)
        {
            warn!(node_id = %node_id, error = %e, "reputation cascade failed");
        }
        Ok(task)
    }

    /// CAS `running → failed`, guarded by the assignee. Posts `task_failure`;
    /// never auto-refunds the escrow — disputes are a human path.
    pub fn fail(
        &self,
        task_id: &TaskId,
        node_id: &NodeId,
        error_message: &str,
        now: Timestamp,
    ) -> Result<Task, GridxError> {
        let node = node_id.clone();
        let message = error_message.to_string();
        let task = self.store.update_task(task_id, |t| {
            if t.status != TaskStatus::Running {
                return Err(Self::conflict(t, "running"));
            }
            Self::guard_assignee(t, &node)?;
            t.status = TaskStatus::Failed;
            t.error_message = Some(message.clone());
            t.completed_at = Some(now);
            t.updated_at = now;
            Ok(())
        })?;
        info!(task_id = %task_id, node_id = %node_id, error = %error_message, "task failed");

        if let Err(e) =
            self.registry.update_reputation(node_id, ReputationEventKind::TaskFailure, None, None)
        {
            warn!(node_id = %node_id, error = %e, "reputation cascade failed");
        }
        Ok(task)
    }

    /// Cancellation is only possible before assignment; anything already
    /// handed to a node must run out or time out.
    pub fn cancel(&self, task_id: &TaskId, now: Timestamp) -> Result<Task, GridxError> {
        let task = self.store.update_task(task_id, |t| {
            if t.status != TaskStatus::Pending {
                return Err(Self::conflict(t, "pending"));
            }
            t.status = TaskStatus::Cancelled;
            t.updated_at = now;
            Ok(())
        })?;
        info!(task_id = %task_id, "task cancelled");
        Ok(task)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get(&self, task_id: &TaskId) -> Result<Task, GridxError> {
        self.store
            .get_task(task_id)?
            .ok_or_else(|| GridxError::TaskNotFound(task_id.to_string()))
    }

    pub fn results(&self, task_id: &TaskId) -> Result<Vec<TaskResultRecord>, GridxError> {
        self.store.iter_results_for_task(task_id)
    }

    pub fn statistics(&self) -> Result<TaskStats, GridxError> {
        let tasks = self.store.iter_tasks()?;
        let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut reward_units: BTreeMap<Currency, u128> = BTreeMap::new();
        let mut exec_time_sum = 0.0;
        let mut exec_time_count = 0usize;
        for t in &tasks {
            *status_counts.entry(t.status.as_str().to_string()).or_default() += 1;
            if t.status == TaskStatus::Completed {
                *reward_units.entry(t.reward.currency()).or_default() += t.reward.units();
                for r in self.store.iter_results_for_task(&t.task_id)? {
                    exec_time_sum += r.execution_time_secs;
                    exec_time_count += 1;
                }
            }
        }
        let total = tasks.len();
        let completed = status_counts.get("completed").copied().unwrap_or(0);
        Ok(TaskStats {
            total_tasks: total,
            status_counts,
            completed_rewards: reward_units
                .into_iter()
                .map(|(c, u)| (c.symbol().to_string(), Amount::from_units(u, c).to_decimal_string()))
                .collect(),
            avg_execution_time_secs: if exec_time_count > 0 {
                exec_time_sum / exec_time_count as f64
            } else {
                0.0
            },
            success_rate: if total > 0 { completed as f64 / total as f64 * 100.0 } else { 0.0 },
        })
    }

    // ── Watchdog ─────────────────────────────────────────────────────────────

    /// Mark running tasks past `started_at + max_execution_time + grace` as
    /// `timeout`, without node cooperation, and post `task_timeout` against
    /// the assigned node. Returns the transitioned task ids.
    pub fn sweep_overdue(&self, now: Timestamp) -> Result<Vec<TaskId>, GridxError> {
        let mut timed_out = Vec::new();
        for task in self.store.iter_tasks()? {
            if task.status != TaskStatus::Running {
                continue;
            }
            let Some(started_at) = task.started_at else { continue };
            let deadline = started_at + task.max_execution_time as i64 + self.config.watchdog_grace_s;
            if now <= deadline {
                continue;
            }
            let result = self.store.update_task(&task.task_id, |t| {
                if t.status != TaskStatus::Running {
                    return Err(Self::conflict(t, "running"));
                }
                t.status = TaskStatus::Timeout;
                t.error_message = Some(format!(
                    "execution exceeded {} s budget",
                    t.max_execution_time
                ));
                t.completed_at = Some(now);
                t.updated_at = now;
                Ok(())
            });
            match result {
                Ok(updated) => {
                    warn!(task_id = %task.task_id, "watchdog timed out task");
                    timed_out.push(task.task_id);
                    if let Some(node_id) = updated.assigned_node_id {
                        if let Err(e) = self.registry.update_reputation(
                            &node_id,
                            ReputationEventKind::TaskTimeout,
                            None,
                            None,
                        ) {
                            warn!(node_id = %node_id, error = %e, "timeout reputation cascade failed");
                        }
                    }
                }
                // The node reported completion or failure between our read
                // and the CAS; that outcome stands.
                Err(GridxError::TransitionConflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(timed_out)
    }

    /// Background watchdog activity.
    pub async fn run_watchdog(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.watchdog_period_s.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.sweep_overdue(now) {
                        warn!(error = %e, "watchdog sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("watchdog stopping");
                        return;
                    }
                }
            }
        }
    }

    // ── Escrow cascade ───────────────────────────────────────────────────────

    /// Pay out a completed task's escrow: obtain the settlement tx hash from
    /// the chain adapter (with backoff on transient failures), then drive the
    /// contract to `completed`. Failures leave the contract `in_progress`
    /// for out-of-band retry; the task's completion stands either way.
    async fn settle_escrow(&self, escrow_id: &ContractId, now: Timestamp) {
        let contract = match self.escrow.get(escrow_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(escrow_id = %escrow_id, error = %e, "settlement skipped: contract lookup failed");
                return;
            }
        };
        let adapter = match self.chains.get(contract.amount.currency()) {
            Ok(a) => a,
            Err(e) => {
                warn!(escrow_id = %escrow_id, error = %e, "settlement skipped: no chain adapter");
                return;
            }
        };
        let seller_address = format!("seller_{}", contract.seller_id);
        // The chain transfer moves the seller share; the escrow service
        // records the same split when it commits the completion.
        let (seller_amount, _) =
            contract.amount.settlement_split(self.escrow.community_share_bp());
        let send = retry_with_backoff("escrow settlement send", 5, || {
            adapter.send(&seller_address, seller_amount, None)
        })
        .await;
        let tx_hash = match send {
            Ok(hash) => hash,
            Err(e) => {
                warn!(escrow_id = %escrow_id, error = %e, "settlement send failed; contract left in progress");
                return;
            }
        };
        if let Err(e) = self.escrow.complete(escrow_id, &tx_hash, now) {
            warn!(escrow_id = %escrow_id, error = %e, "escrow completion failed");
        }
    }
}
