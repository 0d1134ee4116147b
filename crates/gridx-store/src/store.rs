use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use gridx_core::error::GridxError;
use gridx_core::escrow::{EscrowContract, EscrowDispute, EscrowTransaction};
use gridx_core::node::NodeRecord;
use gridx_core::task::{Task, TaskResultRecord};
use gridx_core::types::{ContractId, NodeId, TaskId};

/// Persistent record store backed by sled.
///
/// Named trees:
///   nodes           — node_id utf8 bytes         → bincode(NodeRecord)
///   tasks           — TaskId uuid bytes          → bincode(Task)
///   task_results    — TaskId ++ result uuid      → bincode(TaskResultRecord)
///   escrows         — ContractId uuid bytes      → bincode(EscrowContract)
///   escrow_txs      — ContractId ++ tx uuid      → bincode(EscrowTransaction)
///   escrow_disputes — ContractId ++ dispute uuid → bincode(EscrowDispute)
///   meta            — utf8 key bytes             → raw bytes
///
/// Single-record operations are atomic; multi-record mutations go through the
/// `update_*` combinators, which run inside a sled transaction so concurrent
/// writers to the same record serialize and the loser re-reads committed
/// state.
pub struct Store {
    _db: sled::Db,
    nodes: sled::Tree,
    tasks: sled::Tree,
    task_results: sled::Tree,
    escrows: sled::Tree,
    escrow_txs: sled::Tree,
    escrow_disputes: sled::Tree,
    meta: sled::Tree,
}

fn storage_err(e: sled::Error) -> GridxError {
    GridxError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GridxError> {
    bincode::serialize(value).map_err(|e| GridxError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GridxError> {
    bincode::deserialize(bytes).map_err(|e| GridxError::Serialization(e.to_string()))
}

/// Composite key: 16-byte uuid parent id followed by a 16-byte child uuid,
/// so `scan_prefix(parent)` yields a contract's transactions or disputes.
fn child_key(parent: &[u8; 16], child: &[u8; 16]) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(parent);
    key[16..].copy_from_slice(child);
    key
}

impl Store {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GridxError> {
        let db = sled::open(path).map_err(storage_err)?;
        let nodes           = db.open_tree("nodes").map_err(storage_err)?;
        let tasks           = db.open_tree("tasks").map_err(storage_err)?;
        let task_results    = db.open_tree("task_results").map_err(storage_err)?;
        let escrows         = db.open_tree("escrows").map_err(storage_err)?;
        let escrow_txs      = db.open_tree("escrow_txs").map_err(storage_err)?;
        let escrow_disputes = db.open_tree("escrow_disputes").map_err(storage_err)?;
        let meta            = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self { _db: db, nodes, tasks, task_results, escrows, escrow_txs, escrow_disputes, meta })
    }

    // ── Nodes ────────────────────────────────────────────────────────────────

    pub fn get_node(&self, id: &NodeId) -> Result<Option<NodeRecord>, GridxError> {
        match self.nodes.get(id.as_str().as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_node(&self, node: &NodeRecord) -> Result<(), GridxError> {
        let bytes = encode(node)?;
        self.nodes
            .insert(node.node_id.as_str().as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn remove_node(&self, id: &NodeId) -> Result<bool, GridxError> {
        Ok(self
            .nodes
            .remove(id.as_str().as_bytes())
            .map_err(storage_err)?
            .is_some())
    }

    pub fn iter_nodes(&self) -> Result<Vec<NodeRecord>, GridxError> {
        let mut out = Vec::new();
        for item in self.nodes.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Read-modify-write a node record inside a transaction.
    pub fn update_node<F>(&self, id: &NodeId, mutate: F) -> Result<NodeRecord, GridxError>
    where
        F: Fn(&mut NodeRecord) -> Result<(), GridxError>,
    {
        let key = id.as_str().as_bytes().to_vec();
        let result = self.nodes.transaction(|tx| {
            let bytes = tx.get(&key)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(GridxError::NodeNotFound(id.to_string()))
            })?;
            let mut node: NodeRecord =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            mutate(&mut node).map_err(ConflictableTransactionError::Abort)?;
            let encoded = encode(&node).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(key.as_slice(), encoded)?;
            Ok(node)
        });
        flatten_txn(result)
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    pub fn get_task(&self, id: &TaskId) -> Result<Option<Task>, GridxError> {
        match self.tasks.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_task(&self, task: &Task) -> Result<(), GridxError> {
        let bytes = encode(task)?;
        self.tasks
            .insert(task.task_id.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_tasks(&self) -> Result<Vec<Task>, GridxError> {
        let mut out = Vec::new();
        for item in self.tasks.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// CAS-style task transition: `mutate` validates the current state and
    /// either applies the transition or aborts with a typed error. Concurrent
    /// updaters of the same task serialize; the loser observes the winner's
    /// committed state.
    pub fn update_task<F>(&self, id: &TaskId, mutate: F) -> Result<Task, GridxError>
    where
        F: Fn(&mut Task) -> Result<(), GridxError>,
    {
        let key = *id.as_bytes();
        let result = self.tasks.transaction(|tx| {
            let bytes = tx.get(key)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(GridxError::TaskNotFound(id.to_string()))
            })?;
            let mut task: Task = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            mutate(&mut task).map_err(ConflictableTransactionError::Abort)?;
            let encoded = encode(&task).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&key[..], encoded)?;
            Ok(task)
        });
        flatten_txn(result)
    }

    /// Transition a task and persist its result record in one transaction.
    pub fn update_task_with_result<F>(
        &self,
        id: &TaskId,
        mutate: F,
        result_record: &TaskResultRecord,
    ) -> Result<Task, GridxError>
    where
        F: Fn(&mut Task) -> Result<(), GridxError>,
    {
        let key = *id.as_bytes();
        let result_key = child_key(id.as_bytes(), result_record.result_id.as_bytes());
        let result_bytes = encode(result_record)?;
        let result = (&self.tasks, &self.task_results).transaction(|(tasks, results)| {
            let bytes = tasks.get(key)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(GridxError::TaskNotFound(id.to_string()))
            })?;
            let mut task: Task = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            mutate(&mut task).map_err(ConflictableTransactionError::Abort)?;
            let encoded = encode(&task).map_err(ConflictableTransactionError::Abort)?;
            tasks.insert(&key[..], encoded)?;
            results.insert(result_key.as_slice(), result_bytes.clone())?;
            Ok(task)
        });
        flatten_txn(result)
    }

    pub fn iter_results_for_task(&self, id: &TaskId) -> Result<Vec<TaskResultRecord>, GridxError> {
        let mut out = Vec::new();
        for item in self.task_results.scan_prefix(id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Escrows ──────────────────────────────────────────────────────────────

    pub fn get_escrow(&self, id: &ContractId) -> Result<Option<EscrowContract>, GridxError> {
        match self.escrows.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_escrow(&self, contract: &EscrowContract) -> Result<(), GridxError> {
        let bytes = encode(contract)?;
        self.escrows
            .insert(contract.contract_id.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_escrows(&self) -> Result<Vec<EscrowContract>, GridxError> {
        let mut out = Vec::new();
        for item in self.escrows.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Read-modify-write a contract with no side records.
    pub fn update_escrow<F>(&self, id: &ContractId, mutate: F) -> Result<EscrowContract, GridxError>
    where
        F: Fn(&mut EscrowContract) -> Result<(), GridxError>,
    {
        let key = *id.as_bytes();
        let result = self.escrows.transaction(|tx| {
            let bytes = tx.get(key)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(GridxError::ContractNotFound(id.to_string()))
            })?;
            let mut contract: EscrowContract =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            mutate(&mut contract).map_err(ConflictableTransactionError::Abort)?;
            let encoded = encode(&contract).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&key[..], encoded)?;
            Ok(contract)
        });
        flatten_txn(result)
    }

    /// Transition a contract and append fund-movement records atomically.
    /// Either the new status and every transaction commit, or none do.
    pub fn update_escrow_with_txs<F>(
        &self,
        id: &ContractId,
        mutate: F,
        transactions: &[EscrowTransaction],
    ) -> Result<EscrowContract, GridxError>
    where
        F: Fn(&mut EscrowContract) -> Result<(), GridxError>,
    {
        let key = *id.as_bytes();
        let mut encoded_txs = Vec::with_capacity(transactions.len());
        for t in transactions {
            let k = child_key(id.as_bytes(), t.transaction_id.as_bytes());
            encoded_txs.push((k, encode(t)?));
        }
        let result = (&self.escrows, &self.escrow_txs).transaction(|(escrows, txs)| {
            let bytes = escrows.get(key)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(GridxError::ContractNotFound(id.to_string()))
            })?;
            let mut contract: EscrowContract =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            mutate(&mut contract).map_err(ConflictableTransactionError::Abort)?;
            let encoded = encode(&contract).map_err(ConflictableTransactionError::Abort)?;
            escrows.insert(&key[..], encoded)?;
            for (k, v) in &encoded_txs {
                txs.insert(k.as_slice(), v.clone())?;
            }
            Ok(contract)
        });
        flatten_txn(result)
    }

    /// Transition a contract and record a dispute atomically.
    pub fn update_escrow_with_dispute<F>(
        &self,
        id: &ContractId,
        mutate: F,
        dispute: &EscrowDispute,
    ) -> Result<EscrowContract, GridxError>
    where
        F: Fn(&mut EscrowContract) -> Result<(), GridxError>,
    {
        let key = *id.as_bytes();
        let dispute_key = child_key(id.as_bytes(), dispute.dispute_id.as_bytes());
        let dispute_bytes = encode(dispute)?;
        let result =
            (&self.escrows, &self.escrow_disputes).transaction(|(escrows, disputes)| {
                let bytes = escrows.get(key)?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(GridxError::ContractNotFound(
                        id.to_string(),
                    ))
                })?;
                let mut contract: EscrowContract =
                    decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                mutate(&mut contract).map_err(ConflictableTransactionError::Abort)?;
                let encoded = encode(&contract).map_err(ConflictableTransactionError::Abort)?;
                escrows.insert(&key[..], encoded)?;
                disputes.insert(dispute_key.as_slice(), dispute_bytes.clone())?;
                Ok(contract)
            });
        flatten_txn(result)
    }

    pub fn iter_txs_for_contract(
        &self,
        id: &ContractId,
    ) -> Result<Vec<EscrowTransaction>, GridxError> {
        let mut out = Vec::new();
        for item in self.escrow_txs.scan_prefix(id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn iter_all_txs(&self) -> Result<Vec<EscrowTransaction>, GridxError> {
        let mut out = Vec::new();
        for item in self.escrow_txs.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn iter_disputes_for_contract(
        &self,
        id: &ContractId,
    ) -> Result<Vec<EscrowDispute>, GridxError> {
        let mut out = Vec::new();
        for item in self.escrow_disputes.scan_prefix(id.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), GridxError> {
        self.meta
            .insert(key.as_bytes(), value)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, GridxError> {
        let value = self.meta.get(key.as_bytes()).map_err(storage_err)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), GridxError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

fn flatten_txn<T>(result: Result<T, TransactionError<GridxError>>) -> Result<T, GridxError> {
    match result {
        Ok(v) => Ok(v),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(GridxError::Storage(e.to_string())),
    }
}
