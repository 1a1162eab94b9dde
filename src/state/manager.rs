//! The storage manager: a reference-counted cache of live ledger-state instances built atop the
//! snapshot store.
//!
//! The manager is the only concurrently-shared mutable resource in the engine. Every access to a
//! block's state view goes through a ref-counted checkout
//! ([`get_snapshot_view`](StorageManager::get_snapshot_view) / dropping the returned
//! [`SnapshotView`]): concurrent callers for the same block share one physical instance, and an
//! instance becomes eligible for recycling only once its reference count reaches zero.
//! First-time construction for a block is serialized, so concurrent cache misses cause exactly
//! one physical reconstruction.

use std::collections::HashMap;
use std::fmt::Display;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::state::pluggables::{HeaderStore, LedgerStore, LedgerStoreFactory, StoreError};
use crate::state::redo::RedoLog;
use crate::state::snapshot_store::SnapshotStore;
use crate::types::data_types::{BlockHeight, CryptoHash};

pub struct StorageManager<F: LedgerStoreFactory, H: HeaderStore> {
    factory: F,
    headers: H,
    disk: SnapshotStore,
    slots: Mutex<HashMap<CryptoHash, Slot<F::Store>>>,
    slot_changed: Condvar,
    /// Dumps that in-progress reconstructions anchor on, by reconstruction count.
    /// [`recycle_snapshot`](StorageManager::recycle_snapshot) must not delete these.
    pinned_anchors: Mutex<HashMap<CryptoHash, usize>>,
    tmp_counter: AtomicU64,
}

/// State of one block's cached instance.
enum Slot<S> {
    /// A reconstruction is in progress on some thread; waiters block on
    /// [`StorageManager::slot_changed`].
    Building,

    /// A live instance, shared by `refs` checkouts.
    Ready { store: Arc<S>, refs: usize },
}

impl<F: LedgerStoreFactory, H: HeaderStore> StorageManager<F, H> {
    /// Open the manager over the snapshot directory at `root`, creating the on-disk layout if it
    /// does not exist yet.
    pub fn open(factory: F, headers: H, root: &Path) -> Result<StorageManager<F, H>, SnapshotError> {
        let disk = SnapshotStore::open(root)?;
        Ok(StorageManager {
            factory,
            headers,
            disk,
            slots: Mutex::new(HashMap::new()),
            slot_changed: Condvar::new(),
            pinned_anchors: Mutex::new(HashMap::new()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Allocate a private mutable instance, empty or byte-copied from the snapshot of `base`.
    ///
    /// Fails with [`SnapshotError::NotFound`] if the base snapshot cannot be resolved or
    /// reconstructed. The returned instance is exclusively the caller's; it is not cached and
    /// holds no reference count.
    pub fn create_storage(
        &self,
        name: &str,
        base: Option<&CryptoHash>,
    ) -> Result<F::Store, SnapshotError> {
        match base {
            None => Ok(self.factory.create(name)?),
            Some(base) => {
                // Borrow the base snapshot (reconstructing on miss), then take a byte copy
                // through a scratch dump so the returned instance is private.
                let view = self.get_snapshot_view(base)?;
                let tmp = self.disk.tmp_path(&format!(
                    "{}-{}",
                    name,
                    self.tmp_counter.fetch_add(1, Ordering::Relaxed)
                ));
                let copy = match view.dump_to(&tmp) {
                    Ok(()) => self.factory.load_dump(&tmp),
                    Err(err) => Err(err),
                };
                let _ = std::fs::remove_file(&tmp);
                drop(view);
                Ok(copy?)
            }
        }
    }

    /// Persist `store` as the permanent snapshot of `block`: a full dump, plus `redo` (the log
    /// recorded during the block's execution) if one was captured. The instance is consumed and
    /// stays cached at reference count zero.
    pub fn create_snapshot(
        &self,
        store: F::Store,
        block: &CryptoHash,
        redo: Option<&RedoLog>,
    ) -> Result<(), SnapshotError> {
        store.dump_to(&self.disk.dump_path(block))?;
        if let Some(redo) = redo {
            self.disk.write_redo(block, redo)?;
        }
        let mut slots = self.slots.lock().unwrap();
        slots.insert(
            *block,
            Slot::Ready {
                store: Arc::new(store),
                refs: 0,
            },
        );
        self.slot_changed.notify_all();
        Ok(())
    }

    /// Borrow a read-only view of the state after executing `block`.
    ///
    /// Concurrent callers for the same block share one instance. On a cache miss the snapshot is
    /// reconstructed from the nearest ancestor dump plus forward redo replay; concurrent misses
    /// for the same block wait for the single in-progress reconstruction instead of starting
    /// their own. The view is released by dropping it.
    pub fn get_snapshot_view(
        &self,
        block: &CryptoHash,
    ) -> Result<SnapshotView<'_, F, H>, SnapshotError> {
        let mut slots = self.slots.lock().unwrap();
        loop {
            match slots.get_mut(block) {
                Some(Slot::Ready { store, refs }) => {
                    *refs += 1;
                    return Ok(SnapshotView {
                        manager: self,
                        block: *block,
                        store: store.clone(),
                    });
                }
                Some(Slot::Building) => {
                    slots = self.slot_changed.wait(slots).unwrap();
                }
                None => break,
            }
        }

        // Cache miss: claim the build slot, reconstruct outside the lock.
        slots.insert(*block, Slot::Building);
        drop(slots);

        let built = self.reconstruct(block);

        let mut slots = self.slots.lock().unwrap();
        match built {
            Ok(store) => {
                let store = Arc::new(store);
                slots.insert(
                    *block,
                    Slot::Ready {
                        store: store.clone(),
                        refs: 1,
                    },
                );
                self.slot_changed.notify_all();
                Ok(SnapshotView {
                    manager: self,
                    block: *block,
                    store,
                })
            }
            Err(err) => {
                slots.remove(block);
                self.slot_changed.notify_all();
                Err(err)
            }
        }
    }

    /// Delete the physical dumps of blocks whose instances are not checked out, and evict their
    /// cached instances. The genesis dump is never deleted: it anchors every redo chain, which is
    /// what keeps recycling correctness-preserving. Dumps that an in-progress reconstruction
    /// anchors on are skipped too.
    ///
    /// Returns how many dumps were deleted.
    pub fn recycle_snapshot(&self) -> Result<usize, SnapshotError> {
        let genesis = match self.headers.canonical_at(BlockHeight::new(0))? {
            Some(genesis) => genesis,
            None => return Ok(0),
        };

        let mut deleted = 0;
        for block in self.disk.dumped_blocks()? {
            if block == genesis {
                continue;
            }
            // The pin lock is held across the delete so a reconstruction that pins this dump
            // either sees it gone and re-anchors, or keeps it alive until it is done.
            let pinned = self.pinned_anchors.lock().unwrap();
            if pinned.contains_key(&block) {
                continue;
            }
            {
                let mut slots = self.slots.lock().unwrap();
                match slots.get(&block) {
                    Some(Slot::Ready { refs, .. }) if *refs > 0 => continue,
                    Some(Slot::Building) => continue,
                    Some(Slot::Ready { .. }) => {
                        slots.remove(&block);
                    }
                    None => {}
                }
            }
            match self.disk.delete_dump(&block) {
                Ok(()) => deleted += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(SnapshotError::Io(err)),
            }
        }
        Ok(deleted)
    }

    /// Read back the redo log recorded for `block`, if one exists. Used by the sync server to
    /// answer `GetBlock { want_redo: true }`.
    pub fn redo_log(&self, block: &CryptoHash) -> Result<Option<RedoLog>, SnapshotError> {
        Ok(self.disk.read_redo(block)?)
    }

    /// Whether a physical dump currently exists for `block`.
    pub fn has_dump(&self, block: &CryptoHash) -> bool {
        self.disk.has_dump(block)
    }

    /// Walk parent links from `block` up to the nearest physical dump, then replay each block's
    /// redo log parent-to-child against a private copy of that dump.
    ///
    /// The anchoring dump is pinned against [`recycle_snapshot`](Self::recycle_snapshot) for the
    /// duration of the replay. If a recycling pass deleted the anchor before the pin landed, the
    /// walk restarts and anchors deeper; the genesis dump is never deleted, so the retry
    /// terminates.
    fn reconstruct(&self, block: &CryptoHash) -> Result<F::Store, SnapshotError> {
        loop {
            let (anchor, chain) = self.walk_to_anchor(block)?;
            self.pin_anchor(&anchor);
            if !self.disk.has_dump(&anchor) {
                self.unpin_anchor(&anchor);
                continue;
            }
            let built = self.replay_from(&anchor, &chain);
            self.unpin_anchor(&anchor);
            return built;
        }
    }

    /// Find the nearest ancestor of `block` (inclusive) with a physical dump. Returns it together
    /// with the dump-less descendants passed on the way, deepest last.
    fn walk_to_anchor(
        &self,
        block: &CryptoHash,
    ) -> Result<(CryptoHash, Vec<CryptoHash>), SnapshotError> {
        let mut chain = Vec::new();
        let mut cursor = *block;
        while !self.disk.has_dump(&cursor) {
            let stored = self
                .headers
                .header(&cursor)?
                .ok_or(SnapshotError::NotFound { block: cursor })?;
            chain.push(cursor);
            if stored.header.height.int() == 0 {
                // The genesis dump is gone: nothing anchors this chain.
                return Err(SnapshotError::NotFound { block: cursor });
            }
            cursor = stored.header.parent;
        }
        Ok((cursor, chain))
    }

    fn replay_from(
        &self,
        anchor: &CryptoHash,
        chain: &[CryptoHash],
    ) -> Result<F::Store, SnapshotError> {
        let mut store = self.factory.load_dump(&self.disk.dump_path(anchor))?;
        for ancestor in chain.iter().rev() {
            let redo = self
                .disk
                .read_redo(ancestor)?
                .ok_or(SnapshotError::MissingRedoLog { block: *ancestor })?;
            redo.replay(&mut store)?;
        }
        Ok(store)
    }

    fn pin_anchor(&self, anchor: &CryptoHash) {
        *self
            .pinned_anchors
            .lock()
            .unwrap()
            .entry(*anchor)
            .or_insert(0) += 1;
    }

    fn unpin_anchor(&self, anchor: &CryptoHash) {
        let mut pinned = self.pinned_anchors.lock().unwrap();
        if let Some(count) = pinned.get_mut(anchor) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(anchor);
            }
        }
    }

    fn release(&self, block: &CryptoHash) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(Slot::Ready { refs, .. }) = slots.get_mut(block) {
            debug_assert!(*refs > 0);
            *refs = refs.saturating_sub(1);
        }
        self.slot_changed.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self, block: &CryptoHash) -> usize {
        match self.slots.lock().unwrap().get(block) {
            Some(Slot::Ready { refs, .. }) => *refs,
            _ => 0,
        }
    }
}

/// A checked-out, read-only view of one block's snapshot. Dereferences to the underlying
/// [`LedgerStore`]; dropping it releases the checkout.
pub struct SnapshotView<'a, F: LedgerStoreFactory, H: HeaderStore> {
    manager: &'a StorageManager<F, H>,
    block: CryptoHash,
    store: Arc<F::Store>,
}

impl<F: LedgerStoreFactory, H: HeaderStore> SnapshotView<'_, F, H> {
    /// The block whose snapshot this view reads.
    pub fn block(&self) -> &CryptoHash {
        &self.block
    }
}

impl<F: LedgerStoreFactory, H: HeaderStore> Deref for SnapshotView<'_, F, H> {
    type Target = F::Store;

    fn deref(&self) -> &F::Store {
        &self.store
    }
}

impl<F: LedgerStoreFactory, H: HeaderStore> Drop for SnapshotView<'_, F, H> {
    fn drop(&mut self) {
        self.manager.release(&self.block)
    }
}

/// Error when resolving, creating, or recycling a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// A header along the reconstruction path is missing, or the chain's anchoring dump is gone.
    /// Callers decide whether to re-request ancestors or abort.
    NotFound { block: CryptoHash },

    /// A block along the reconstruction path has a dumpless snapshot and no redo log; its state
    /// cannot be reproduced.
    MissingRedoLog { block: CryptoHash },

    /// A pluggable store failed; indicates local corruption.
    Store(StoreError),

    /// Disk I/O on dumps or logs failed.
    Io(io::Error),
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::NotFound { block } => {
                write!(f, "snapshot not reconstructible: missing ancestor of {}", block)
            }
            SnapshotError::MissingRedoLog { block } => {
                write!(f, "snapshot not reconstructible: missing redo log of {}", block)
            }
            SnapshotError::Store(err) => write!(f, "snapshot store fault: {}", err),
            SnapshotError::Io(err) => write!(f, "snapshot I/O fault: {}", err),
        }
    }
}

impl From<StoreError> for SnapshotError {
    fn from(err: StoreError) -> SnapshotError {
        SnapshotError::Store(err)
    }
}

impl From<io::Error> for SnapshotError {
    fn from(err: io::Error) -> SnapshotError {
        SnapshotError::Io(err)
    }
}
