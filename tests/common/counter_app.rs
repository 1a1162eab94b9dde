//! An [`App`] that keeps track of a single number in a key-value table. Every transaction is an
//! 8-byte little-endian delta added to the number, and every receipt is the number after the
//! addition.

use chainrep::app::{App, BlockOutcome, ExecuteError, ViewApp};
use chainrep::state::pluggables::LedgerStore;
use chainrep::state::redo::RecordingStore;
use chainrep::types::{
    block::{Block, Receipt, Transaction},
    data_types::TableName,
    header::Header,
};

use crate::common::mem_ledger::MemLedger;

pub(crate) const COUNTER_TABLE: &str = "counter";
pub(crate) const NUMBER_KEY: &[u8] = b"n";

pub(crate) struct CounterApp;

/// Read the current number out of `store`.
pub(crate) fn read_number(store: &MemLedger) -> u64 {
    let bytes = store
        .get(&TableName::new(COUNTER_TABLE), NUMBER_KEY)
        .expect("the counter table is seeded at genesis");
    u64::from_le_bytes(bytes.try_into().expect("the number is 8 bytes"))
}

/// Apply `transactions` to `store`, returning the receipts. Shared between [`CounterApp`] and the
/// block-building helpers in [`crate::common::blocks`] so both produce identical redo logs.
pub(crate) fn apply_transactions(
    store: &mut RecordingStore<MemLedger>,
    transactions: &[Transaction],
) -> Result<Vec<Receipt>, ExecuteError> {
    let mut number = read_number(store);
    let mut receipts = Vec::with_capacity(transactions.len());
    for transaction in transactions {
        let delta =
            u64::from_le_bytes(transaction.bytes().clone().try_into().map_err(|_| {
                ExecuteError::Invalid {
                    what: "transaction is not an 8-byte delta".to_string(),
                }
            })?);
        number = number.wrapping_add(delta);
        store.put(
            TableName::new(COUNTER_TABLE),
            NUMBER_KEY.to_vec(),
            number.to_le_bytes().to_vec(),
        )?;
        receipts.push(Receipt::new(number.to_le_bytes().to_vec()));
    }
    Ok(receipts)
}

impl App<MemLedger> for CounterApp {
    fn execute_block(
        &mut self,
        block: &Block,
        store: &mut RecordingStore<MemLedger>,
    ) -> Result<BlockOutcome, ExecuteError> {
        let receipts = apply_transactions(store, &block.transactions)?;
        Ok(BlockOutcome {
            state_digest: store.state_digest(),
            receipts_digest: Block::receipts_digest(&receipts),
        })
    }
}

pub(crate) struct CounterViewApp;

impl ViewApp<MemLedger> for CounterViewApp {
    fn call(
        &self,
        _header: &Header,
        store: &MemLedger,
        method: &str,
        _params: &[u8],
    ) -> Result<Vec<u8>, ExecuteError> {
        match method {
            "get" => Ok(read_number(store).to_le_bytes().to_vec()),
            other => Err(ExecuteError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}
