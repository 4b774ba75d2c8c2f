//! Local store capability and an in-memory implementation.
//!
//! Each inbound batch of events becomes one [`WriteBatch`], which the store
//! must apply atomically: readers observe either none or all of it. Only
//! when the store refuses a batch does the manager fall back to committing
//! its writes one at a time.

use crate::error::{Result, SyncError};
use crate::types::Record;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

/// A single id-keyed write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Add a new record. Fails if the id exists.
    Insert { id: String, record: Record },
    /// Insert or replace.
    Upsert { id: String, record: Record },
    /// Remove a record by id. Fails if the id is unknown.
    Delete { id: String },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Insert { id, .. } | WriteOp::Upsert { id, .. } | WriteOp::Delete { id } => id,
        }
    }
}

/// An ordered set of writes applied as one unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, record: Record) {
        self.ops.push(WriteOp::Insert {
            id: id.into(),
            record,
        });
    }

    pub fn upsert(&mut self, id: impl Into<String>, record: Record) {
        self.ops.push(WriteOp::Upsert {
            id: id.into(),
            record,
        });
    }

    pub fn delete(&mut self, id: impl Into<String>) {
        self.ops.push(WriteOp::Delete { id: id.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

impl From<WriteOp> for WriteBatch {
    fn from(op: WriteOp) -> Self {
        Self { ops: vec![op] }
    }
}

/// Id-keyed batch-write surface of the local reactive store.
pub trait LocalCollection: Send + Sync {
    /// Apply every op in `batch`, or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<()>;
}

/// In-memory [`LocalCollection`] keyed by record id.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All ids in ascending order.
    pub fn ids(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    /// Clone of every record, ordered by id.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.read().values().cloned().collect()
    }

    /// Check a batch against current contents, tracking ids the batch itself
    /// adds or removes so later ops see earlier ones.
    fn validate(current: &BTreeMap<String, Record>, batch: &WriteBatch) -> Result<()> {
        let mut added: HashSet<&str> = HashSet::new();
        let mut removed: HashSet<&str> = HashSet::new();

        for op in batch.ops() {
            let id = op.id();
            let exists = (current.contains_key(id) || added.contains(id)) && !removed.contains(id);
            match op {
                WriteOp::Insert { .. } => {
                    if exists {
                        return Err(SyncError::DuplicateRecord(id.to_string()));
                    }
                    added.insert(id);
                    removed.remove(id);
                }
                WriteOp::Upsert { .. } => {
                    added.insert(id);
                    removed.remove(id);
                }
                WriteOp::Delete { .. } => {
                    if !exists {
                        return Err(SyncError::RecordNotFound(id.to_string()));
                    }
                    removed.insert(id);
                    added.remove(id);
                }
            }
        }
        Ok(())
    }
}

impl LocalCollection for MemoryCollection {
    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut records = self.records.write();
        Self::validate(&records, &batch)?;

        for op in batch.into_ops() {
            match op {
                WriteOp::Insert { id, record } | WriteOp::Upsert { id, record } => {
                    records.insert(id, record);
                }
                WriteOp::Delete { id } => {
                    records.remove(&id);
                }
            }
        }
        Ok(())
    }
}
