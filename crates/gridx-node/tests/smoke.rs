//! End-to-end smoke test for gridx-node.
//!
//! Starts a real node process with a fresh store, drives the registry, task,
//! and escrow APIs over JSON-RPC, and asserts state changes are reflected.
//!
//! Run with:
//!   cargo test -p gridx-node --test smoke

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ── Node under test ───────────────────────────────────────────────────────────

/// A spawned gridx-node process on fresh loopback ports and a throwaway
/// store. Killed and cleaned up on drop.
struct TestNode {
    child: Child,
    data_dir: PathBuf,
    rpc_url: String,
}

impl TestNode {
    fn launch(tag: &str) -> Self {
        let data_dir = std::env::temp_dir().join(format!("gridx_e2e_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&data_dir);

        let rpc_port = loopback_port(std::net::TcpListener::bind("127.0.0.1:0").unwrap());
        let p2p_listen = udp_port();
        let p2p_broadcast = udp_port();

        let child = Command::new(env!("CARGO_BIN_EXE_gridx-node"))
            .arg("--node-id").arg(format!("{tag}-node"))
            .arg("--data-dir").arg(&data_dir)
            .arg("--rpc-addr").arg(format!("127.0.0.1:{rpc_port}"))
            .arg("--p2p-listen-port").arg(p2p_listen.to_string())
            .arg("--p2p-broadcast-port").arg(p2p_broadcast.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn gridx-node");

        Self {
            child,
            data_dir,
            rpc_url: format!("http://127.0.0.1:{rpc_port}"),
        }
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
        std::fs::remove_dir_all(&self.data_dir).ok();
    }
}

fn loopback_port(listener: std::net::TcpListener) -> u16 {
    listener.local_addr().unwrap().port()
}

fn udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// ── JSON-RPC test client ──────────────────────────────────────────────────────

/// Minimal JSON-RPC 2.0 client for driving the node under test. Request ids
/// increment per call so concurrent helpers stay distinguishable in logs.
struct GridxClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl GridxClient {
    fn connect(node: &TestNode) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: node.rpc_url.clone(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Raw round trip: the full JSON-RPC response object, transport errors
    /// surfaced as Err.
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, reqwest::Error> {
        let envelope = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        self.http
            .post(&self.url)
            .json(&envelope)
            .send()
            .await?
            .json()
            .await
    }

    /// Call a method that must succeed; returns its `result`.
    async fn call(&self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let response = self
            .request(method, params)
            .await
            .unwrap_or_else(|e| panic!("{method}: transport failure: {e}"));
        match response.get("error") {
            None => response["result"].clone(),
            Some(err) => panic!("{method} returned an error: {err}"),
        }
    }

    /// Call a method that must fail; returns the JSON-RPC error code.
    async fn expect_err(&self, method: &str, params: serde_json::Value) -> i64 {
        let response = self
            .request(method, params)
            .await
            .unwrap_or_else(|e| panic!("{method}: transport failure: {e}"));
        match response.get("error") {
            Some(err) => err["code"].as_i64().expect("error code"),
            None => panic!("{method} unexpectedly succeeded: {}", response["result"]),
        }
    }

    /// Poll until the server answers a trivial query or the deadline passes.
    async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.request("gridx_getNodes", serde_json::json!([])).await.is_ok() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        false
    }
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_registry_task_and_escrow_flows() {
    let node = TestNode::launch("smoke");
    let client = GridxClient::connect(&node);
    assert!(
        client.wait_ready(Duration::from_secs(20)).await,
        "gridx-node did not become ready within 20 seconds"
    );

    // ── Register two nodes; query by capability ───────────────────────────────
    client
        .call(
            "gridx_registerNode",
            serde_json::json!(["n1", "10.0.0.1:9000", ["python", "compute"]]),
        )
        .await;
    client
        .call(
            "gridx_registerNode",
            serde_json::json!(["n2", "10.0.0.2:9000", ["python"]]),
        )
        .await;

    let both_caps = client
        .call(
            "gridx_queryNodes",
            serde_json::json!([{"capabilities": ["python", "compute"], "match_all": true}]),
        )
        .await;
    let ids: Vec<&str> = both_caps
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["node_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["n1"], "match_all should select only n1");

    let any_caps = client
        .call(
            "gridx_queryNodes",
            serde_json::json!([{"capabilities": ["python", "compute"], "match_all": false}]),
        )
        .await;
    let mut ids: Vec<String> = any_caps
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["node_id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["n1", "n2"]);

    // ── Reputation clamp at the ceiling ───────────────────────────────────────
    let up = client
        .call(
            "gridx_updateReputation",
            serde_json::json!(["n1", "task_success", 95.0]),
        )
        .await;
    assert_eq!(up["new_reputation"].as_f64().unwrap(), 95.0);
    assert!(!up["clamped"].as_bool().unwrap());

    let up = client
        .call(
            "gridx_updateReputation",
            serde_json::json!(["n1", "task_success", null]),
        )
        .await;
    assert_eq!(up["new_reputation"].as_f64().unwrap(), 100.0);
    assert!(up["clamped"].as_bool().unwrap());

    // ── Escrow happy path over RPC ────────────────────────────────────────────
    let contract = client
        .call(
            "gridx_createEscrow",
            serde_json::json!([{
                "escrow_type": "service_payment",
                "buyer_id": "b1",
                "seller_id": "s1",
                "amount": "10.00",
                "currency": "FLOP"
            }]),
        )
        .await;
    let contract_id = contract["contract_id"].as_str().unwrap().to_string();
    assert_eq!(contract["status"], "pending");

    client
        .call("gridx_fundEscrow", serde_json::json!([contract_id, "TXF"]))
        .await;
    client
        .call("gridx_startEscrow", serde_json::json!([contract_id]))
        .await;
    let completed = client
        .call("gridx_completeEscrow", serde_json::json!([contract_id, "TXC"]))
        .await;
    assert_eq!(completed["status"], "completed");

    let txs = client
        .call("gridx_getEscrowTransactions", serde_json::json!([contract_id]))
        .await;
    let txs = txs.as_array().unwrap();
    let find = |kind: &str| {
        txs.iter()
            .find(|t| t["transaction_type"] == kind)
            .unwrap_or_else(|| panic!("missing {kind} transaction"))
    };
    assert_eq!(find("seller_payment")["amount"], "9.50000000");
    assert_eq!(find("seller_payment")["to_address"], "seller_s1");
    assert_eq!(find("community_fund")["amount"], "0.50000000");

    // A second fund attempt is a conflict.
    let code = client
        .expect_err("gridx_fundEscrow", serde_json::json!([contract_id, "TXF2"]))
        .await;
    assert_eq!(code, -32002);

    // Unsupported currency is a validation error.
    let code = client
        .expect_err(
            "gridx_createEscrow",
            serde_json::json!([{
                "escrow_type": "service_payment",
                "buyer_id": "b1",
                "seller_id": "s1",
                "amount": "1.00",
                "currency": "PEPE"
            }]),
        )
        .await;
    assert_eq!(code, -32602);

    // ── Task lifecycle over RPC ───────────────────────────────────────────────
    let task = client
        .call(
            "gridx_submitTask",
            serde_json::json!([{
                "task_type": "python_script",
                "payload": {"mock": "ok"},
                "priority": "normal",
                "max_execution_time": 30,
                "required_capabilities": ["python"],
                "reward": "5.0",
                "currency": "FLOP",
                "submitter_id": "user-1"
            }]),
        )
        .await;
    let task_id = task["task_id"].as_str().unwrap().to_string();
    assert_eq!(task["status"], "pending");

    let available = client
        .call("gridx_availableTasks", serde_json::json!([["python", "compute"]]))
        .await;
    assert_eq!(available.as_array().unwrap().len(), 1);

    client
        .call("gridx_assignTask", serde_json::json!([task_id, "n1"]))
        .await;

    // Assigning again loses the CAS.
    let code = client
        .expect_err("gridx_assignTask", serde_json::json!([task_id, "n2"]))
        .await;
    assert_eq!(code, -32002);

    client
        .call("gridx_startTask", serde_json::json!([task_id, "n1"]))
        .await;
    let done = client
        .call(
            "gridx_completeTask",
            serde_json::json!([task_id, "n1", {"output": "42"}, 1.5]),
        )
        .await;
    assert_eq!(done["status"], "completed");

    let read = client
        .call("gridx_getTask", serde_json::json!([task_id]))
        .await;
    assert_eq!(read["assigned_node_id"], "n1");
    assert_eq!(read["result"]["output"], "42");

    let stats = client
        .call("gridx_taskStatistics", serde_json::json!([]))
        .await;
    assert_eq!(stats["status_counts"]["completed"].as_u64().unwrap(), 1);
}
