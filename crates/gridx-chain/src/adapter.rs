use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use gridx_core::currency::{Amount, Currency};
use gridx_core::error::GridxError;
use gridx_core::types::Timestamp;

/// One entry of an adapter's transaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_hash: String,
    pub to_address: Option<String>,
    pub amount: String,
    pub category: String,
    pub time: Timestamp,
}

/// A chain backend for a single currency.
///
/// Variants behind one surface: `get_balance`, `new_address`, `send`,
/// `history`. Calls are transient-failure-prone; callers retry with
/// [`crate::retry_with_backoff`].
pub enum ChainAdapter {
    /// Deterministic placeholder backend for development and tests. Must be
    /// explicitly enabled by configuration; never use in production.
    Stub(StubAdapter),
    /// JSON-RPC client for a real chain daemon.
    JsonRpc(JsonRpcAdapter),
}

impl ChainAdapter {
    pub fn currency(&self) -> Currency {
        match self {
            ChainAdapter::Stub(a) => a.currency,
            ChainAdapter::JsonRpc(a) => a.currency,
        }
    }

    pub async fn get_balance(&self) -> Result<Amount, GridxError> {
        match self {
            ChainAdapter::Stub(a) => Ok(a.get_balance()),
            ChainAdapter::JsonRpc(a) => a.get_balance().await,
        }
    }

    pub async fn new_address(&self) -> Result<String, GridxError> {
        match self {
            ChainAdapter::Stub(a) => Ok(a.new_address()),
            ChainAdapter::JsonRpc(a) => a.new_address().await,
        }
    }

    /// Send `amount` to `to`; returns the transaction hash.
    pub async fn send(
        &self,
        to: &str,
        amount: Amount,
        fee: Option<Amount>,
    ) -> Result<String, GridxError> {
        match self {
            ChainAdapter::Stub(a) => a.send(to, amount),
            ChainAdapter::JsonRpc(a) => a.send(to, amount, fee).await,
        }
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<TxRecord>, GridxError> {
        match self {
            ChainAdapter::Stub(a) => Ok(a.history(limit)),
            ChainAdapter::JsonRpc(a) => a.history(limit).await,
        }
    }
}

// ── Stub adapter ─────────────────────────────────────────────────────────────

/// Deterministic placeholder chain: a fixed balance, counted addresses, and
/// content-derived transaction hashes. Two stubs fed the same sequence of
/// calls produce the same values.
pub struct StubAdapter {
    pub currency: Currency,
    counter: AtomicU64,
}

impl StubAdapter {
    pub fn new(currency: Currency) -> Self {
        Self { currency, counter: AtomicU64::new(0) }
    }

    pub fn get_balance(&self) -> Amount {
        // 1000 whole coins, regardless of currency.
        Amount::from_units(1_000 * self.currency.base_units_per_coin(), self.currency)
    }

    pub fn new_address(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}_stub_{n:08}", self.currency.symbol().to_lowercase())
    }

    pub fn send(&self, to: &str, amount: Amount) -> Result<String, GridxError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let seed = format!("{}:{}:{}:{}", self.currency.symbol(), to, amount.units(), n);
        let tx_hash = format!("stub_{}", &blake3::hash(seed.as_bytes()).to_hex()[..32]);
        info!(currency = %self.currency, to = %to, tx_hash = %tx_hash, "stub transaction");
        Ok(tx_hash)
    }

    pub fn history(&self, _limit: usize) -> Vec<TxRecord> {
        Vec::new()
    }
}

// ── JSON-RPC adapter ─────────────────────────────────────────────────────────

/// Raw JSON-RPC 1.0/2.0 client for bitcoind-style daemons
/// (`getbalance`, `getnewaddress`, `sendtoaddress`, `listtransactions`).
pub struct JsonRpcAdapter {
    pub currency: Currency,
    url: String,
    client: reqwest::Client,
}

impl JsonRpcAdapter {
    pub fn new(currency: Currency, url: &str, timeout: Duration) -> Result<Self, GridxError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GridxError::ChainRpc(format!("building http client: {e}")))?;
        Ok(Self { currency, url: url.to_string(), client })
    }

    /// Call an RPC method and return the `result` field.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, GridxError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GridxError::ChainRpc(format!("{method} to {}: {e}", self.url)))?;
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GridxError::ChainRpc(format!("parsing {method} response: {e}")))?;
        if let Some(err) = json.get("error") {
            if !err.is_null() {
                return Err(GridxError::ChainRpc(format!("{method}: {err}")));
            }
        }
        Ok(json.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    pub async fn get_balance(&self) -> Result<Amount, GridxError> {
        let result = self.call("getbalance", serde_json::json!([])).await?;
        let text = match &result {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(GridxError::ChainRpc(format!("unexpected balance: {other}")));
            }
        };
        Amount::parse(&text, self.currency)
            .map_err(|e| GridxError::ChainRpc(format!("parsing balance {text}: {e}")))
    }

    pub async fn new_address(&self) -> Result<String, GridxError> {
        let result = self.call("getnewaddress", serde_json::json!([])).await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GridxError::ChainRpc("expected address string".into()))
    }

    pub async fn send(
        &self,
        to: &str,
        amount: Amount,
        fee: Option<Amount>,
    ) -> Result<String, GridxError> {
        let mut params = vec![
            serde_json::json!(to),
            serde_json::json!(amount.to_decimal_string()),
        ];
        if let Some(fee) = fee {
            params.push(serde_json::json!(fee.to_decimal_string()));
        }
        let result = self
            .call("sendtoaddress", serde_json::Value::Array(params))
            .await?;
        debug!(currency = %self.currency, to = %to, "sendtoaddress submitted");
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GridxError::ChainRpc("expected tx hash string".into()))
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<TxRecord>, GridxError> {
        let result = self
            .call("listtransactions", serde_json::json!(["*", limit]))
            .await?;
        let entries = result
            .as_array()
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(TxRecord {
                tx_hash: entry.get("txid").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                to_address: entry
                    .get("address")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                amount: entry
                    .get("amount")
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                category: entry
                    .get("category")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                time: entry.get("time").and_then(|v| v.as_i64()).unwrap_or(0),
            });
        }
        Ok(out)
    }
}
