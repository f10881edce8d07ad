//! The transaction manager (§4.I): begin/enqueue/commit/rollback with
//! per-collection snapshot backup for all-or-nothing semantics.

use std::collections::HashMap;

use crate::error::{Error, TdbxResult};
use crate::record::Collection;

/// A mutation recorded against a collection inside an open transaction.
/// The engine replays these in order against live storage on commit.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Insert {
        collection: String,
        record: crate::record::Record,
    },
    Update {
        collection: String,
        filter: serde_json::Value,
        changes: crate::record::Record,
    },
    Delete {
        collection: String,
        filter: serde_json::Value,
    },
}

impl PendingOp {
    fn collection(&self) -> &str {
        match self {
            PendingOp::Insert { collection, .. }
            | PendingOp::Update { collection, .. }
            | PendingOp::Delete { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open,
    Committed,
    RolledBack,
}

/// One open transaction: the queued operations plus a snapshot of every
/// collection touched, taken the first time that collection is touched.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: u64,
    pub status: Status,
    operations: Vec<PendingOp>,
    snapshots: HashMap<String, Collection>,
}

impl Transaction {
    fn new(id: u64) -> Self {
        Transaction {
            id,
            status: Status::Open,
            operations: Vec::new(),
            snapshots: HashMap::new(),
        }
    }

    /// Queues `op`, snapshotting its collection's current on-disk records
    /// the first time that collection is touched within this transaction.
    /// `current_records` is only invoked (and only has to succeed) on that
    /// first touch.
    pub fn enqueue(
        &mut self,
        op: PendingOp,
        current_records: impl FnOnce() -> TdbxResult<Collection>,
    ) -> TdbxResult<()> {
        if self.status != Status::Open {
            return Err(Error::Transaction(format!(
                "transaction {} is no longer open",
                self.id
            )));
        }
        if !self.snapshots.contains_key(op.collection()) {
            let snapshot = current_records()?;
            self.snapshots.insert(op.collection().to_string(), snapshot);
        }
        self.operations.push(op);
        Ok(())
    }

    pub fn operations(&self) -> &[PendingOp] {
        &self.operations
    }

    pub fn snapshot_for(&self, collection: &str) -> Option<&Collection> {
        self.snapshots.get(collection)
    }

    pub fn snapshotted_collections(&self) -> impl Iterator<Item = &String> {
        self.snapshots.keys()
    }
}

/// Tracks every open transaction for one engine instance and hands out
/// fresh identifiers.
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_id: u64,
    open: HashMap<u64, Transaction>,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager::default()
    }

    pub fn begin(&mut self) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.open.insert(id, Transaction::new(id));
        id
    }

    pub fn get_mut(&mut self, id: u64) -> TdbxResult<&mut Transaction> {
        self.open
            .get_mut(&id)
            .ok_or_else(|| Error::Transaction(format!("unknown transaction id {id}")))
    }

    pub fn get(&self, id: u64) -> TdbxResult<&Transaction> {
        self.open
            .get(&id)
            .ok_or_else(|| Error::Transaction(format!("unknown transaction id {id}")))
    }

    /// Removes a transaction from the open table, its work finished one way
    /// or another.
    pub fn finish(&mut self, id: u64) {
        self.open.remove(&id);
    }
}
