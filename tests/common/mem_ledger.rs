//! A simple, in-memory implementation of [`LedgerStore`] whose dumps are borsh files.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use borsh::{BorshDeserialize, BorshSerialize};
use chainrep::state::pluggables::{LedgerStore, LedgerStoreFactory, StoreError};
use chainrep::state::redo::{RedoOp, TableKind};
use chainrep::types::data_types::{CryptoHash, TableName};
use sha2::{Digest, Sha256};

/// An in-memory implementation of [`LedgerStore`]. Tables are `BTreeMap`s so that serialization
/// order, and therefore [`state_digest`](LedgerStore::state_digest), is content-determined.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct MemLedger {
    tables: BTreeMap<TableName, Table>,
}

#[derive(Clone, BorshSerialize, BorshDeserialize)]
enum Table {
    KeyValue(BTreeMap<Vec<u8>, Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>),
    List(BTreeMap<Vec<u8>, Vec<Vec<u8>>>),
}

impl Table {
    fn empty(kind: TableKind) -> Table {
        match kind {
            TableKind::KeyValue => Table::KeyValue(BTreeMap::new()),
            TableKind::Hash => Table::Hash(BTreeMap::new()),
            TableKind::List => Table::List(BTreeMap::new()),
        }
    }
}

impl MemLedger {
    /// Create a new, empty `MemLedger`.
    pub(crate) fn new() -> MemLedger {
        MemLedger {
            tables: BTreeMap::new(),
        }
    }
}

fn bad_op(what: &str) -> StoreError {
    StoreError::BadOp {
        what: what.to_string(),
    }
}

impl LedgerStore for MemLedger {
    fn apply(&mut self, op: &RedoOp) -> Result<(), StoreError> {
        match op {
            RedoOp::CreateTable { table, kind } => {
                if self.tables.contains_key(table) {
                    return Err(bad_op("table already exists"));
                }
                self.tables.insert(table.clone(), Table::empty(*kind));
                Ok(())
            }
            RedoOp::AlterTable { table, kind } => {
                if !self.tables.contains_key(table) {
                    return Err(bad_op("altering a missing table"));
                }
                self.tables.insert(table.clone(), Table::empty(*kind));
                Ok(())
            }
            RedoOp::Put { table, key, value } => match self.tables.get_mut(table) {
                Some(Table::KeyValue(map)) => {
                    map.insert(key.clone(), value.clone());
                    Ok(())
                }
                _ => Err(bad_op("Put against a missing or mistyped table")),
            },
            RedoOp::Delete { table, key } => match self.tables.get_mut(table) {
                Some(Table::KeyValue(map)) => {
                    map.remove(key);
                    Ok(())
                }
                _ => Err(bad_op("Delete against a missing or mistyped table")),
            },
            RedoOp::HashPut {
                table,
                key,
                field,
                value,
            } => match self.tables.get_mut(table) {
                Some(Table::Hash(map)) => {
                    map.entry(key.clone())
                        .or_default()
                        .insert(field.clone(), value.clone());
                    Ok(())
                }
                _ => Err(bad_op("HashPut against a missing or mistyped table")),
            },
            RedoOp::HashDelete { table, key, field } => match self.tables.get_mut(table) {
                Some(Table::Hash(map)) => {
                    if let Some(fields) = map.get_mut(key) {
                        fields.remove(field);
                    }
                    Ok(())
                }
                _ => Err(bad_op("HashDelete against a missing or mistyped table")),
            },
            RedoOp::ListPush { table, key, value } => match self.tables.get_mut(table) {
                Some(Table::List(map)) => {
                    map.entry(key.clone()).or_default().push(value.clone());
                    Ok(())
                }
                _ => Err(bad_op("ListPush against a missing or mistyped table")),
            },
            RedoOp::ListPop { table, key } => match self.tables.get_mut(table) {
                Some(Table::List(map)) => {
                    if let Some(list) = map.get_mut(key) {
                        list.pop();
                    }
                    Ok(())
                }
                _ => Err(bad_op("ListPop against a missing or mistyped table")),
            },
        }
    }

    fn get(&self, table: &TableName, key: &[u8]) -> Option<Vec<u8>> {
        match self.tables.get(table) {
            Some(Table::KeyValue(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    fn hash_get(&self, table: &TableName, key: &[u8], field: &[u8]) -> Option<Vec<u8>> {
        match self.tables.get(table) {
            Some(Table::Hash(map)) => map.get(key).and_then(|fields| fields.get(field)).cloned(),
            _ => None,
        }
    }

    fn list(&self, table: &TableName, key: &[u8]) -> Option<Vec<Vec<u8>>> {
        match self.tables.get(table) {
            Some(Table::List(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    fn state_digest(&self) -> CryptoHash {
        let mut hasher = Sha256::new();
        hasher.update(self.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    fn dump_to(&self, path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&self.try_to_vec()?)
    }
}

/// Factory for [`MemLedger`]s. Stateless: instances share nothing.
#[derive(Clone)]
pub(crate) struct MemLedgerFactory;

impl LedgerStoreFactory for MemLedgerFactory {
    type Store = MemLedger;

    fn create(&self, _name: &str) -> io::Result<MemLedger> {
        Ok(MemLedger::new())
    }

    fn load_dump(&self, path: &Path) -> io::Result<MemLedger> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        MemLedger::deserialize(&mut &*bytes)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}
