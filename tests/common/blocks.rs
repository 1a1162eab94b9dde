//! Helpers for building well-formed counter-app chains in tests.

use chainrep::state::pluggables::LedgerStore;
use chainrep::state::redo::{RecordingStore, RedoLog, TableKind};
use chainrep::types::{
    block::{Block, Transaction},
    data_types::{BlockHeight, CryptoHash, TableName, Timestamp},
    header::Header,
};

use crate::common::counter_app::{apply_transactions, COUNTER_TABLE, NUMBER_KEY};
use crate::common::mem_ledger::MemLedger;

/// The state the genesis block declares: the counter table, seeded with 0.
pub(crate) fn genesis_state() -> MemLedger {
    let mut store = RecordingStore::new(MemLedger::new());
    store
        .create_table(TableName::new(COUNTER_TABLE), TableKind::KeyValue)
        .unwrap();
    store
        .put(
            TableName::new(COUNTER_TABLE),
            NUMBER_KEY.to_vec(),
            0u64.to_le_bytes().to_vec(),
        )
        .unwrap();
    store.into_parts().0
}

/// The genesis block of the test chain, together with the state it declares.
pub(crate) fn make_genesis() -> (Block, MemLedger) {
    let state = genesis_state();
    let header = Header::new(
        BlockHeight::new(0),
        CryptoHash::new([0u8; 32]),
        Timestamp::new(0),
        state.state_digest(),
        Block::transactions_root(&[]),
        Block::receipts_digest(&[]),
        Vec::new(),
    );
    (Block::new(header, Vec::new(), Vec::new()), state)
}

/// Build a well-formed child of `parent` carrying one transaction per delta in `deltas`, executed
/// against a copy of `parent_state`. Returns the block, the state after it, and its redo log.
pub(crate) fn extend(
    parent: &Header,
    parent_state: &MemLedger,
    deltas: &[u64],
) -> (Block, MemLedger, RedoLog) {
    let transactions: Vec<Transaction> = deltas
        .iter()
        .map(|delta| Transaction::new(delta.to_le_bytes().to_vec()))
        .collect();

    let mut store = RecordingStore::new(parent_state.clone());
    let receipts = apply_transactions(&mut store, &transactions).unwrap();
    let (state, redo) = store.into_parts();

    let header = Header::new(
        parent.height + 1,
        parent.hash,
        Timestamp::new(parent.timestamp.int() + 1),
        state.state_digest(),
        Block::transactions_root(&transactions),
        Block::receipts_digest(&receipts),
        Vec::new(),
    );
    (Block::new(header, transactions, receipts), state, redo)
}

/// Build a straight chain of `length` blocks on top of genesis, each incrementing the counter by
/// 1. Element 0 is the genesis block with an empty redo log.
pub(crate) fn build_chain(length: usize) -> Vec<(Block, MemLedger, RedoLog)> {
    let (genesis, genesis_state) = make_genesis();
    let mut chain = vec![(genesis, genesis_state, RedoLog::default())];
    for _ in 0..length {
        let (parent, parent_state, _) = chain.last().unwrap();
        let next = extend(&parent.header, parent_state, &[1]);
        chain.push(next);
    }
    chain
}
