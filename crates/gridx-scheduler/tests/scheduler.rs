//! Scheduler state-machine tests over the full service wiring: real store,
//! registry, escrow service, and stub chain adapters.
//!
//! Run with:
//!   cargo test -p gridx-scheduler --test scheduler

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gridx_chain::AdapterRegistry;
use gridx_core::config::{ChainSection, EscrowSection, RegistrySection, SchedulerSection};
use gridx_core::currency::{Amount, Currency};
use gridx_core::error::{ErrorKind, GridxError};
use gridx_core::escrow::{EscrowStatus, EscrowType, TransactionKind};
use gridx_core::task::{TaskPriority, TaskStatus};
use gridx_core::types::NodeId;
use gridx_escrow::EscrowService;
use gridx_registry::NodeRegistry;
use gridx_scheduler::TaskScheduler;
use gridx_store::Store;

struct Services {
    scheduler: Arc<TaskScheduler>,
    registry: Arc<NodeRegistry>,
    escrow: Arc<EscrowService>,
    dir: std::path::PathBuf,
}

impl Drop for Services {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn wire(tag: &str) -> Services {
    let dir = std::env::temp_dir().join(format!("gridx_sched_{tag}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let store = Arc::new(Store::open(&dir).unwrap());
    let registry =
        Arc::new(NodeRegistry::open(store.clone(), RegistrySection::default()).unwrap());
    let escrow = Arc::new(EscrowService::new(
        store.clone(),
        EscrowSection::default(),
        Currency::ALL.to_vec(),
    ));
    let chains = Arc::new(
        AdapterRegistry::from_config(&ChainSection::default(), &Currency::ALL).unwrap(),
    );
    let scheduler = Arc::new(TaskScheduler::new(
        store,
        registry.clone(),
        escrow.clone(),
        chains,
        SchedulerSection::default(),
    ));
    Services { scheduler, registry, escrow, dir }
}

fn caps(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|s| s.to_string()).collect()
}

fn register_node(services: &Services, id: &str, tags: &[&str]) {
    services
        .registry
        .register(
            NodeId::from(id),
            format!("10.0.0.{}:9000", id.len()),
            caps(tags),
            None,
            BTreeMap::new(),
            None,
            1_700_000_000,
        )
        .unwrap();
}

fn flop(s: &str) -> Amount {
    Amount::parse(s, Currency::Flop).unwrap()
}

fn submit_simple(services: &Services, priority: TaskPriority, created_at: i64) -> gridx_core::task::Task {
    services
        .scheduler
        .submit(
            "python_script",
            r#"{"mock": "ok"}"#,
            priority,
            30,
            caps(&["python"]),
            flop("5.0"),
            "user-1",
            None,
            created_at,
        )
        .unwrap()
}

#[tokio::test]
async fn selection_orders_by_priority_then_fifo() {
    let services = wire("ordering");
    let low = submit_simple(&services, TaskPriority::Low, 100);
    let normal_late = submit_simple(&services, TaskPriority::Normal, 300);
    let normal_early = submit_simple(&services, TaskPriority::Normal, 200);
    let urgent = submit_simple(&services, TaskPriority::Urgent, 400);

    // A task requiring caps the node lacks never shows up.
    services
        .scheduler
        .submit("x", "{}", TaskPriority::Urgent, 30, caps(&["gpu"]), flop("1"), "user-1", None, 50)
        .unwrap();

    let available = services.scheduler.available_for(&caps(&["python"])).unwrap();
    let ids: Vec<_> = available.iter().map(|t| t.task_id).collect();
    assert_eq!(
        ids,
        vec![urgent.task_id, normal_early.task_id, normal_late.task_id, low.task_id]
    );
}

#[tokio::test]
async fn assignment_race_has_exactly_one_winner() {
    let services = wire("race");
    register_node(&services, "n1", &["python"]);
    register_node(&services, "n2", &["python"]);
    let task = submit_simple(&services, TaskPriority::Normal, 100);

    let s1 = services.scheduler.clone();
    let s2 = services.scheduler.clone();
    let id = task.task_id;
    let a = tokio::task::spawn_blocking(move || s1.assign(&id, &NodeId::from("n1"), 200));
    let b = tokio::task::spawn_blocking(move || s2.assign(&id, &NodeId::from("n2"), 200));
    let results = [a.await.unwrap(), b.await.unwrap()];

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one assignment must succeed");
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert_eq!(loser.as_ref().unwrap_err().kind(), ErrorKind::Conflict);

    let read = services.scheduler.get(&task.task_id).unwrap();
    assert_eq!(read.status, TaskStatus::Assigned);
    assert!(read.assigned_node_id.is_some());
}

#[tokio::test]
async fn start_requires_the_assignee() {
    let services = wire("assignee");
    register_node(&services, "n1", &["python"]);
    let task = submit_simple(&services, TaskPriority::Normal, 100);
    services.scheduler.assign(&task.task_id, &NodeId::from("n1"), 110).unwrap();

    let err = services
        .scheduler
        .start(&task.task_id, &NodeId::from("intruder"), 120)
        .unwrap_err();
    assert!(matches!(err, GridxError::WrongAssignee { .. }));

    services.scheduler.start(&task.task_id, &NodeId::from("n1"), 120).unwrap();
    let read = services.scheduler.get(&task.task_id).unwrap();
    assert_eq!(read.status, TaskStatus::Running);
    assert_eq!(read.started_at, Some(120));
}

#[tokio::test]
async fn completion_cascades_to_escrow_and_reputation() {
    let services = wire("cascade");
    register_node(&services, "n1", &["python"]);

    let contract = services
        .escrow
        .create(EscrowType::TaskExecution, "buyer-1", "n1", flop("10.00"), None, "", "", 50)
        .unwrap();
    services.escrow.fund(&contract.contract_id, "TXF", 60).unwrap();

    let task = services
        .scheduler
        .submit(
            "python_script",
            r#"{"mock": "ok"}"#,
            TaskPriority::Normal,
            30,
            caps(&["python"]),
            flop("10.00"),
            "buyer-1",
            Some(contract.contract_id),
            100,
        )
        .unwrap();

    let n1 = NodeId::from("n1");
    services.scheduler.assign(&task.task_id, &n1, 110).unwrap();
    services.scheduler.start(&task.task_id, &n1, 120).unwrap();
    // start() pushes the funded escrow into in_progress.
    assert_eq!(services.escrow.get(&contract.contract_id).unwrap().status, EscrowStatus::InProgress);

    services
        .scheduler
        .complete(&task.task_id, &n1, r#"{"success":true}"#, 1.25, 130)
        .await
        .unwrap();

    // Task terminal, with a persisted result record.
    let done = services.scheduler.get(&task.task_id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    let results = services.scheduler.results(&task.task_id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].execution_time_secs, 1.25);

    // Escrow settled through the stub chain adapter: 9.50 / 0.50 split.
    let settled = services.escrow.get(&contract.contract_id).unwrap();
    assert_eq!(settled.status, EscrowStatus::Completed);
    let txs = services.escrow.transactions(&contract.contract_id).unwrap();
    let seller = txs.iter().find(|t| t.kind == TransactionKind::SellerPayment).unwrap();
    assert!(seller.tx_hash.starts_with("stub_"));
    assert_eq!(seller.amount.to_decimal_string(), "9.50000000");

    // Reputation cascade: +10 for task_success.
    assert_eq!(services.registry.get(&n1).unwrap().reputation, 10.0);
}

#[tokio::test]
async fn failure_posts_negative_reputation_and_no_refund() {
    let services = wire("failure");
    register_node(&services, "n1", &["python"]);
    services
        .registry
        .update_reputation(&NodeId::from("n1"), gridx_core::reputation::ReputationEventKind::TaskSuccess, Some(20.0), None)
        .unwrap();

    let contract = services
        .escrow
        .create(EscrowType::TaskExecution, "buyer-1", "n1", flop("10.00"), None, "", "", 50)
        .unwrap();
    services.escrow.fund(&contract.contract_id, "TXF", 60).unwrap();

    let task = services
        .scheduler
        .submit("x", "{}", TaskPriority::Normal, 30, caps(&["python"]), flop("1"), "buyer-1", Some(contract.contract_id), 100)
        .unwrap();
    let n1 = NodeId::from("n1");
    services.scheduler.assign(&task.task_id, &n1, 110).unwrap();
    services.scheduler.start(&task.task_id, &n1, 120).unwrap();
    services.scheduler.fail(&task.task_id, &n1, "exit code 1", 130).unwrap();

    let read = services.scheduler.get(&task.task_id).unwrap();
    assert_eq!(read.status, TaskStatus::Failed);
    assert_eq!(read.error_message.as_deref(), Some("exit code 1"));

    // task_failure is -5.
    assert_eq!(services.registry.get(&n1).unwrap().reputation, 15.0);

    // No automatic refund: the escrow stays where the failure left it.
    let escrow = services.escrow.get(&contract.contract_id).unwrap();
    assert_eq!(escrow.status, EscrowStatus::InProgress);
    assert!(services
        .escrow
        .transactions(&contract.contract_id)
        .unwrap()
        .iter()
        .all(|t| t.kind != TransactionKind::Refund));
}

#[tokio::test]
async fn watchdog_times_out_overdue_tasks() {
    let services = wire("watchdog");
    register_node(&services, "n1", &["python"]);
    services
        .registry
        .update_reputation(&NodeId::from("n1"), gridx_core::reputation::ReputationEventKind::TaskSuccess, Some(50.0), None)
        .unwrap();

    let task = services
        .scheduler
        .submit("x", "{}", TaskPriority::Normal, 1, caps(&["python"]), flop("1"), "u1", None, 100)
        .unwrap();
    let n1 = NodeId::from("n1");
    services.scheduler.assign(&task.task_id, &n1, 100).unwrap();
    services.scheduler.start(&task.task_id, &n1, 100).unwrap();

    // Inside budget + grace: nothing happens.
    assert!(services.scheduler.sweep_overdue(101).unwrap().is_empty());

    // Past started_at + max_execution_time + grace (100 + 1 + 5): timeout.
    let swept = services.scheduler.sweep_overdue(107).unwrap();
    assert_eq!(swept, vec![task.task_id]);
    let read = services.scheduler.get(&task.task_id).unwrap();
    assert_eq!(read.status, TaskStatus::Timeout);
    assert!(read.error_message.is_some());

    // task_timeout is -10.
    assert_eq!(services.registry.get(&n1).unwrap().reputation, 40.0);

    // Terminal states never transition again.
    let err = services
        .scheduler
        .complete(&task.task_id, &n1, "{}", 1.0, 200)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn cancel_only_from_pending() {
    let services = wire("cancel");
    register_node(&services, "n1", &["python"]);
    let task = submit_simple(&services, TaskPriority::Normal, 100);
    services.scheduler.cancel(&task.task_id, 110).unwrap();
    assert_eq!(services.scheduler.get(&task.task_id).unwrap().status, TaskStatus::Cancelled);

    let other = submit_simple(&services, TaskPriority::Normal, 100);
    services.scheduler.assign(&other.task_id, &NodeId::from("n1"), 110).unwrap();
    let err = services.scheduler.cancel(&other.task_id, 120).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn submission_validations() {
    let services = wire("validate");
    let err = services
        .scheduler
        .submit("x", "{}", TaskPriority::Normal, 0, caps(&[]), flop("1"), "u1", None, 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = services
        .scheduler
        .submit("x", "{}", TaskPriority::Normal, 30, caps(&[]), flop("1"), "", None, 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn statistics_reflect_outcomes() {
    let services = wire("stats");
    register_node(&services, "n1", &["python"]);
    let n1 = NodeId::from("n1");

    let t1 = submit_simple(&services, TaskPriority::Normal, 100);
    services.scheduler.assign(&t1.task_id, &n1, 110).unwrap();
    services.scheduler.start(&t1.task_id, &n1, 120).unwrap();
    services.scheduler.complete(&t1.task_id, &n1, "{}", 2.0, 130).await.unwrap();

    let _pending = submit_simple(&services, TaskPriority::Normal, 100);

    let stats = services.scheduler.statistics().unwrap();
    assert_eq!(stats.total_tasks, 2);
    assert_eq!(stats.status_counts["completed"], 1);
    assert_eq!(stats.status_counts["pending"], 1);
    assert_eq!(stats.completed_rewards["FLOP"], "5.00000000");
    assert_eq!(stats.avg_execution_time_secs, 2.0);
    assert_eq!(stats.success_rate, 50.0);
}

#[tokio::test]
async fn worker_loop_drains_a_task_with_the_mock_sandbox() {
    let services = wire("worker");
    register_node(&services, "n1", &["python"]);
    let task = submit_simple(&services, TaskPriority::Normal, 100);

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(gridx_scheduler::run_worker(
        services.scheduler.clone(),
        services.registry.clone(),
        Arc::new(gridx_scheduler::Sandbox::Mock(gridx_scheduler::MockSandbox)),
        NodeId::from("n1"),
        stop_rx,
    ));

    // The worker polls every couple of seconds; give it a generous window.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(20);
    loop {
        let current = services.scheduler.get(&task.task_id).unwrap();
        if current.status == TaskStatus::Completed {
            assert_eq!(current.assigned_node_id, Some(NodeId::from("n1")));
            assert!(current.result.is_some());
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "worker did not complete the task (status {})",
            current.status
        );
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    stop_tx.send(true).unwrap();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
}
