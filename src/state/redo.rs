//! Redo logs: the ordered mutation lists recorded during a block's execution, and the recording
//! wrapper that captures them.

use std::ops::Deref;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::pluggables::{LedgerStore, StoreError};
use crate::types::data_types::TableName;

/// The shape of a ledger table, fixed at creation (or changed by `AlterTable`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TableKind {
    KeyValue,
    Hash,
    List,
}

/// One high-level mutation of ledger state.
///
/// This is the complete mutation vocabulary: every change a block's execution makes to the ledger
/// goes through exactly one of these, which is what makes a block's
/// [redo log](RedoLog) a faithful record of its execution.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum RedoOp {
    CreateTable { table: TableName, kind: TableKind },
    AlterTable { table: TableName, kind: TableKind },
    Put { table: TableName, key: Vec<u8>, value: Vec<u8> },
    Delete { table: TableName, key: Vec<u8> },
    HashPut { table: TableName, key: Vec<u8>, field: Vec<u8>, value: Vec<u8> },
    HashDelete { table: TableName, key: Vec<u8>, field: Vec<u8> },
    ListPush { table: TableName, key: Vec<u8>, value: Vec<u8> },
    ListPop { table: TableName, key: Vec<u8> },
}

/// The ordered list of [`RedoOp`]s recorded during one block's execution.
///
/// Replaying a block's redo log against its parent's state reproduces the block's snapshot
/// byte-for-byte; this is what lets [`recycle_snapshot`](crate::state::manager::StorageManager::recycle_snapshot)
/// delete full dumps without losing any state view.
#[derive(Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct RedoLog(Vec<RedoOp>);

impl RedoLog {
    /// Create a new `RedoLog` wrapping `ops`.
    pub fn new(ops: Vec<RedoOp>) -> Self {
        Self(ops)
    }

    /// Get a reference to the inner `Vec<RedoOp>` of this `RedoLog`.
    pub const fn ops(&self) -> &Vec<RedoOp> {
        &self.0
    }

    /// Get how many ops are in this `RedoLog`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this `RedoLog` records no mutations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply every op, in order, to `store`.
    pub fn replay<S: LedgerStore>(&self, store: &mut S) -> Result<(), StoreError> {
        for op in &self.0 {
            store.apply(op)?;
        }
        Ok(())
    }
}

/// Wraps a [`LedgerStore`] so that every mutation is both applied and appended to a [`RedoLog`].
///
/// Block executors mutate state exclusively through this wrapper (reads pass through via
/// `Deref`), so the log it accumulates is exactly the block's redo log. Consumed with
/// [`into_parts`](RecordingStore::into_parts) once execution finishes.
pub struct RecordingStore<S: LedgerStore> {
    store: S,
    log: RedoLog,
}

impl<S: LedgerStore> RecordingStore<S> {
    /// Start recording on top of `store`.
    pub fn new(store: S) -> RecordingStore<S> {
        RecordingStore {
            store,
            log: RedoLog::default(),
        }
    }

    /// Apply `op` to the wrapped store and record it. Ops that fail are not recorded.
    pub fn apply(&mut self, op: RedoOp) -> Result<(), StoreError> {
        self.store.apply(&op)?;
        self.log.0.push(op);
        Ok(())
    }

    /// Stop recording, yielding the mutated store and the accumulated log.
    pub fn into_parts(self) -> (S, RedoLog) {
        (self.store, self.log)
    }

    /* Convenience constructors for each mutation kind. */

    pub fn create_table(&mut self, table: TableName, kind: TableKind) -> Result<(), StoreError> {
        self.apply(RedoOp::CreateTable { table, kind })
    }

    pub fn alter_table(&mut self, table: TableName, kind: TableKind) -> Result<(), StoreError> {
        self.apply(RedoOp::AlterTable { table, kind })
    }

    pub fn put(&mut self, table: TableName, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.apply(RedoOp::Put { table, key, value })
    }

    pub fn delete(&mut self, table: TableName, key: Vec<u8>) -> Result<(), StoreError> {
        self.apply(RedoOp::Delete { table, key })
    }

    pub fn hash_put(
        &mut self,
        table: TableName,
        key: Vec<u8>,
        field: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.apply(RedoOp::HashPut {
            table,
            key,
            field,
            value,
        })
    }

    pub fn hash_delete(
        &mut self,
        table: TableName,
        key: Vec<u8>,
        field: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.apply(RedoOp::HashDelete { table, key, field })
    }

    pub fn list_push(
        &mut self,
        table: TableName,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.apply(RedoOp::ListPush { table, key, value })
    }

    pub fn list_pop(&mut self, table: TableName, key: Vec<u8>) -> Result<(), StoreError> {
        self.apply(RedoOp::ListPop { table, key })
    }
}

impl<S: LedgerStore> Deref for RecordingStore<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.store
    }
}
