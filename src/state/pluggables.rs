//! Traits for pluggable header/block persistence and ledger state storage.

use std::fmt::Display;
use std::io;
use std::path::Path;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::redo::RedoOp;
use crate::types::{
    data_types::{BlockHeight, CryptoHash, TableName},
    header::{Header, VerifyState},
};

/// Persistent store for headers, the canonical-chain index, and raw block bytes.
///
/// The engine is the exclusive writer of a `HeaderStore`; library users provide the
/// implementation (e.g. over an embedded column store) and may read from it concurrently.
/// Like [`LedgerStoreFactory`], clones of a `HeaderStore` must share the same underlying
/// storage.
///
/// # Invariants implementations must uphold
///
/// 1. A header is visible only once persisted, and [`save_header`](HeaderStore::save_header)
///    must refuse a header whose parent is not already stored (the genesis header, at height 0,
///    is exempt).
/// 2. [`update_verified`](HeaderStore::update_verified) must refuse transitions that violate
///    [`VerifyState::may_become`]: verification states are monotonic and terminal.
pub trait HeaderStore: Clone + Send + Sync + 'static {
    /// Get the stored header with hash `hash`, if any.
    fn header(&self, hash: &CryptoHash) -> Result<Option<StoredHeader>, StoreError>;

    /// Get the hash of the canonical-chain header at `height`, if the canonical chain is that
    /// long.
    fn canonical_at(&self, height: BlockHeight) -> Result<Option<CryptoHash>, StoreError>;

    /// Get the current canonical tip, i.e. the header last passed to
    /// [`change_best`](HeaderStore::change_best).
    fn best_header(&self) -> Result<Option<StoredHeader>, StoreError>;

    /// Persist `header` with verification state `NotVerified`.
    fn save_header(&mut self, header: &Header) -> Result<(), StoreError>;

    /// Set the verification state of the header with hash `hash`.
    fn update_verified(&mut self, hash: &CryptoHash, state: VerifyState) -> Result<(), StoreError>;

    /// Move the canonical-chain pointer to the header with hash `hash`, re-indexing
    /// [`canonical_at`](HeaderStore::canonical_at) along the walk from the old best to the new.
    fn change_best(&mut self, hash: &CryptoHash) -> Result<(), StoreError>;

    /// Get the hashes of the stored children of the header with hash `hash`.
    fn children(&self, hash: &CryptoHash) -> Result<Vec<CryptoHash>, StoreError>;

    /// Get the raw bytes of the block with hash `hash`, if stored.
    fn block_bytes(&self, hash: &CryptoHash) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store the raw bytes of the block with hash `hash`.
    fn put_block_bytes(&mut self, hash: &CryptoHash, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Whether the raw bytes of the block with hash `hash` are stored.
    fn has_block(&self, hash: &CryptoHash) -> Result<bool, StoreError> {
        Ok(self.block_bytes(hash)?.is_some())
    }
}

/// A header as persisted: the header value together with its verification state.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct StoredHeader {
    pub header: Header,
    pub verify_state: VerifyState,
}

/// One live instance of ledger state: a set of named tables mutated exclusively through
/// [`RedoOp`]s.
///
/// Routing every mutation through [`apply`](LedgerStore::apply) is what makes redo recording
/// (and therefore snapshot reconstruction) possible: the
/// [`RecordingStore`](crate::state::redo::RecordingStore) wrapper captures the exact op sequence
/// of a block's execution, and replaying that sequence against the parent state must be
/// deterministic and byte-identical to the original execution result.
pub trait LedgerStore: Send + Sync + 'static {
    /// Apply one mutation. Returns [`StoreError::BadOp`] if the op is inconsistent with the
    /// current state (e.g. a `Put` against a missing table).
    fn apply(&mut self, op: &RedoOp) -> Result<(), StoreError>;

    /// Get the value at `key` in key-value table `table`.
    fn get(&self, table: &TableName, key: &[u8]) -> Option<Vec<u8>>;

    /// Get the value at `field` of the hash at `key` in hash table `table`.
    fn hash_get(&self, table: &TableName, key: &[u8], field: &[u8]) -> Option<Vec<u8>>;

    /// Get the whole list at `key` in list table `table`.
    fn list(&self, table: &TableName, key: &[u8]) -> Option<Vec<Vec<u8>>>;

    /// Compute a digest over the entire current state. Must be a pure function of state content:
    /// two instances holding identical state must return identical digests.
    fn state_digest(&self) -> CryptoHash;

    /// Serialize the entire current state into the file at `path` (the "full dump" physical
    /// snapshot form). A dump written by one instance and loaded through
    /// [`LedgerStoreFactory::load_dump`] must reproduce identical state.
    fn dump_to(&self, path: &Path) -> io::Result<()>;
}

/// Creates and rehydrates [`LedgerStore`] instances. Clones must share any underlying resources
/// (e.g. a storage engine handle) such that stores created by any clone are interchangeable.
pub trait LedgerStoreFactory: Clone + Send + Sync + 'static {
    type Store: LedgerStore;

    /// Allocate a fresh, empty, private instance. `name` is a debugging tag (e.g. `"verify"`),
    /// not an identity.
    fn create(&self, name: &str) -> io::Result<Self::Store>;

    /// Load a private instance from the dump file at `path`.
    fn load_dump(&self, path: &Path) -> io::Result<Self::Store>;
}

/// Error when reading from or writing to a pluggable store. Indicates local corruption or local
/// I/O failure, never peer misbehavior: callers log it and surface it upward without retrying.
#[derive(Debug)]
pub enum StoreError {
    /// An I/O error from the underlying storage.
    Io(std::io::Error),

    /// A stored value could not be deserialized into its expected type.
    Corrupt { what: String },

    /// A write violated a store invariant (unknown parent, non-monotonic verification-state
    /// transition, op against a missing or mistyped table).
    BadOp { what: String },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "storage I/O error: {}", err),
            StoreError::Corrupt { what } => write!(f, "corrupt stored value: {}", what),
            StoreError::BadOp { what } => write!(f, "store invariant violated: {}", what),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> StoreError {
        StoreError::Io(err)
    }
}
