//! Traits implemented by applications that run on top of the replication engine.
//!
//! The engine replicates blocks; what a block *means* is the application's business. An [`App`]
//! executes block contents against ledger state during verification; a [`ViewApp`] answers
//! read-only queries against any block's snapshot. Consensus-specific header rules plug in
//! separately through [`HeaderPolicy`](crate::chain::policy::HeaderPolicy).

use std::fmt::Display;

use crate::state::pluggables::{LedgerStore, StoreError};
use crate::state::redo::RecordingStore;
use crate::types::{block::Block, data_types::CryptoHash, header::Header};

/// Executes blocks against ledger state.
///
/// `execute_block` is called with a private scratch instance seeded from the parent block's
/// snapshot, wrapped for redo recording. It must be deterministic: the same block against the
/// same parent state must produce the same mutations and the same outcome on every node.
pub trait App<S: LedgerStore>: Send + 'static {
    /// Execute `block`'s transactions against `store`. Returns the digests the block's header
    /// must carry for the block to be accepted, or an [`ExecuteError`] if the contents are
    /// unacceptable regardless of digests.
    fn execute_block(
        &mut self,
        block: &Block,
        store: &mut RecordingStore<S>,
    ) -> Result<BlockOutcome, ExecuteError>;
}

/// What a block's execution produced, compared bit-for-bit against the header's claims.
pub struct BlockOutcome {
    pub state_digest: CryptoHash,
    pub receipts_digest: CryptoHash,
}

/// Answers read-only queries against a block's state snapshot.
pub trait ViewApp<S: LedgerStore>: Send + Sync + 'static {
    /// Answer the query `method` with argument `params` against `store`, the snapshot of the
    /// block with header `header`. Must not mutate anything.
    fn call(
        &self,
        header: &Header,
        store: &S,
        method: &str,
        params: &[u8],
    ) -> Result<Vec<u8>, ExecuteError>;
}

/// Error from application execution or a query.
#[derive(Debug)]
pub enum ExecuteError {
    /// The block's contents are invalid. The block will be marked `Invalid` permanently.
    Invalid { what: String },

    /// The query method is not one the [`ViewApp`] answers.
    UnknownMethod { method: String },

    /// The underlying store failed. A local fault, not a verdict on the block.
    Store(StoreError),
}

impl Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteError::Invalid { what } => write!(f, "invalid block contents: {}", what),
            ExecuteError::UnknownMethod { method } => write!(f, "unknown query method: {}", method),
            ExecuteError::Store(err) => write!(f, "store fault during execution: {}", err),
        }
    }
}

impl From<StoreError> for ExecuteError {
    fn from(err: StoreError) -> ExecuteError {
        ExecuteError::Store(err)
    }
}
