//! The read-only query surface: resolve a block, borrow its snapshot, and run a [`ViewApp`]
//! query against it.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::app::{ExecuteError, ViewApp};
use crate::state::manager::{SnapshotError, StorageManager};
use crate::state::pluggables::{HeaderStore, LedgerStoreFactory, StoreError, StoredHeader};
use crate::types::{data_types::CryptoHash, header::VerifyState};

/// A cloneable handle for querying any verified block's state.
///
/// Queries hold one internal lock from block resolution through execution, so the snapshot a
/// query runs against is exactly the snapshot that was resolved; concurrent tip movement cannot
/// swap it mid-query. Queries against explicit historical or side-branch blocks are served the
/// same way as tip queries.
pub struct ChainReader<H, F, V>
where
    H: HeaderStore,
    F: LedgerStoreFactory,
    V: ViewApp<F::Store>,
{
    headers: H,
    manager: Arc<StorageManager<F, H>>,
    view_app: Arc<V>,
    synced: Arc<AtomicBool>,
    query_lock: Arc<Mutex<()>>,
}

impl<H, F, V> Clone for ChainReader<H, F, V>
where
    H: HeaderStore,
    F: LedgerStoreFactory,
    V: ViewApp<F::Store>,
{
    fn clone(&self) -> Self {
        Self {
            headers: self.headers.clone(),
            manager: self.manager.clone(),
            view_app: self.view_app.clone(),
            synced: self.synced.clone(),
            query_lock: self.query_lock.clone(),
        }
    }
}

impl<H, F, V> ChainReader<H, F, V>
where
    H: HeaderStore,
    F: LedgerStoreFactory,
    V: ViewApp<F::Store>,
{
    pub(crate) fn new(
        headers: H,
        manager: Arc<StorageManager<F, H>>,
        view_app: Arc<V>,
        synced: Arc<AtomicBool>,
    ) -> Self {
        Self {
            headers,
            manager,
            view_app,
            synced,
            query_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run the read-only query `method` against the snapshot of `at` (the canonical tip when
    /// `None`).
    ///
    /// Refuses with [`QueryError::NotSynced`] until the node's initial sync quorum is reached:
    /// a still-syncing node would answer from a stale chain.
    pub fn call_get(
        &self,
        at: Option<&CryptoHash>,
        method: &str,
        params: &[u8],
    ) -> Result<Vec<u8>, QueryError> {
        let _guard = self.query_lock.lock().unwrap();

        if !self.synced.load(Ordering::SeqCst) {
            return Err(QueryError::NotSynced);
        }

        let stored = match at {
            Some(hash) => self
                .headers
                .header(hash)?
                .ok_or(QueryError::UnknownBlock { block: *hash })?,
            None => self.headers.best_header()?.ok_or(QueryError::NoChain)?,
        };
        if stored.verify_state != VerifyState::Verified {
            return Err(QueryError::NotVerified {
                block: stored.header.hash,
            });
        }

        let view = self.manager.get_snapshot_view(&stored.header.hash)?;
        let result = self
            .view_app
            .call(&stored.header, &view, method, params)?;
        Ok(result)
    }

    /// The current canonical tip, if the node is past its sync quorum.
    pub fn best_header(&self) -> Result<Option<StoredHeader>, QueryError> {
        if !self.synced.load(Ordering::SeqCst) {
            return Err(QueryError::NotSynced);
        }
        Ok(self.headers.best_header()?)
    }

    /// Look up any stored header, canonical or not. Available even before the sync quorum.
    pub fn header(&self, hash: &CryptoHash) -> Result<Option<StoredHeader>, QueryError> {
        Ok(self.headers.header(hash)?)
    }

    /// Whether the node has completed its initial sync.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// Error when answering a query.
#[derive(Debug)]
pub enum QueryError {
    /// The node has not reached its initial sync quorum; its chain view is not authoritative
    /// yet.
    NotSynced,

    /// No header with the requested hash is stored.
    UnknownBlock { block: CryptoHash },

    /// The requested block exists but its body has not been verified (or was found invalid), so
    /// it has no snapshot.
    NotVerified { block: CryptoHash },

    /// The node has no chain at all (not even a genesis header).
    NoChain,

    Execute(ExecuteError),

    Store(StoreError),

    Snapshot(SnapshotError),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::NotSynced => write!(f, "the node has not completed its initial sync"),
            QueryError::UnknownBlock { block } => write!(f, "no header stored for {}", block),
            QueryError::NotVerified { block } => {
                write!(f, "block {} has no verified snapshot", block)
            }
            QueryError::NoChain => write!(f, "no chain is initialized"),
            QueryError::Execute(err) => write!(f, "query execution failed: {}", err),
            QueryError::Store(err) => write!(f, "storage fault during query: {}", err),
            QueryError::Snapshot(err) => write!(f, "snapshot fault during query: {}", err),
        }
    }
}

impl From<ExecuteError> for QueryError {
    fn from(err: ExecuteError) -> QueryError {
        QueryError::Execute(err)
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> QueryError {
        QueryError::Store(err)
    }
}

impl From<SnapshotError> for QueryError {
    fn from(err: SnapshotError) -> QueryError {
        QueryError::Snapshot(err)
    }
}
