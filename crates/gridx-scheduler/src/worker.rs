use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridx_core::error::{ErrorKind, GridxError};
use gridx_core::types::NodeId;
use gridx_registry::NodeRegistry;

use crate::sandbox::{Sandbox, SandboxOutcome};
use crate::scheduler::TaskScheduler;

/// How long an idle worker waits before polling for work again.
const IDLE_POLL_SECS: u64 = 2;

/// One local worker activity: query available work for this node's
/// capabilities, claim a task, run it in the sandbox, report the outcome.
///
/// Assignment conflicts are routine (another node won the claim) and just
/// mean moving on to the next candidate.
pub async fn run_worker(
    scheduler: Arc<TaskScheduler>,
    registry: Arc<NodeRegistry>,
    sandbox: Arc<Sandbox>,
    node_id: NodeId,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(IDLE_POLL_SECS)) => {
                if let Err(e) = work_once(&scheduler, &registry, &sandbox, &node_id).await {
                    warn!(node_id = %node_id, error = %e, "worker iteration failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(node_id = %node_id, "worker stopping");
                    return;
                }
            }
        }
    }
}

async fn work_once(
    scheduler: &TaskScheduler,
    registry: &NodeRegistry,
    sandbox: &Sandbox,
    node_id: &NodeId,
) -> Result<(), GridxError> {
    let capabilities = registry.get(node_id)?.capabilities;
    let candidates = scheduler.available_for(&capabilities)?;

    for candidate in candidates {
        let now = chrono::Utc::now().timestamp();
        let task = match scheduler.assign(&candidate.task_id, node_id, now) {
            Ok(task) => task,
            // Another node won this one; try the next candidate.
            Err(e) if e.kind() == ErrorKind::Conflict => continue,
            Err(e) => return Err(e),
        };
        scheduler.start(&task.task_id, node_id, chrono::Utc::now().timestamp())?;
        info!(task_id = %task.task_id, node_id = %node_id, "worker picked up task");

        let outcome = sandbox.execute(&task).await;
        let now = chrono::Utc::now().timestamp();
        match outcome {
            SandboxOutcome::Completed { output, duration_secs } => {
                let result = serde_json::json!({
                    "success": true,
                    "output": output,
                    "execution_time": duration_secs,
                })
                .to_string();
                scheduler
                    .complete(&task.task_id, node_id, &result, duration_secs, now)
                    .await?;
            }
            SandboxOutcome::Failed { error, .. } => {
                scheduler.fail(&task.task_id, node_id, &error, now)?;
            }
            SandboxOutcome::TimedOut { duration_secs } => {
                // Report timeout promptly rather than waiting for the
                // watchdog; the terminal state is the same.
                debug!(task_id = %task.task_id, duration_secs, "worker observed timeout");
                let swept = scheduler.sweep_overdue(now)?;
                if !swept.contains(&task.task_id) {
                    // Inside the grace window: let the watchdog settle it.
                    return Ok(());
                }
            }
        }
        // One task per iteration keeps the loop responsive to shutdown.
        return Ok(());
    }
    Ok(())
}
