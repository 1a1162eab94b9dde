//! A volatile, in-memory implementation of [`HeaderStore`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chainrep::state::pluggables::{HeaderStore, StoreError, StoredHeader};
use chainrep::types::{
    data_types::{BlockHeight, CryptoHash},
    header::{Header, VerifyState},
};

/// An in-memory implementation of [`HeaderStore`]. Clones share the same maps, as the trait
/// requires.
#[derive(Clone)]
pub(crate) struct MemHeaderStore(Arc<Mutex<Inner>>);

struct Inner {
    headers: HashMap<CryptoHash, StoredHeader>,
    children: HashMap<CryptoHash, Vec<CryptoHash>>,
    // Canonical hashes indexed by height.
    canonical: Vec<CryptoHash>,
    best: Option<CryptoHash>,
    blocks: HashMap<CryptoHash, Vec<u8>>,
}

impl MemHeaderStore {
    /// Create a new, empty `MemHeaderStore`.
    pub(crate) fn new() -> MemHeaderStore {
        MemHeaderStore(Arc::new(Mutex::new(Inner {
            headers: HashMap::new(),
            children: HashMap::new(),
            canonical: Vec::new(),
            best: None,
            blocks: HashMap::new(),
        })))
    }
}

fn bad_op(what: &str) -> StoreError {
    StoreError::BadOp {
        what: what.to_string(),
    }
}

impl HeaderStore for MemHeaderStore {
    fn header(&self, hash: &CryptoHash) -> Result<Option<StoredHeader>, StoreError> {
        Ok(self.0.lock().unwrap().headers.get(hash).cloned())
    }

    fn canonical_at(&self, height: BlockHeight) -> Result<Option<CryptoHash>, StoreError> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .canonical
            .get(height.int() as usize)
            .copied())
    }

    fn best_header(&self) -> Result<Option<StoredHeader>, StoreError> {
        let inner = self.0.lock().unwrap();
        Ok(inner
            .best
            .as_ref()
            .and_then(|best| inner.headers.get(best).cloned()))
    }

    fn save_header(&mut self, header: &Header) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        if inner.headers.contains_key(&header.hash) {
            return Ok(());
        }
        if header.height.int() != 0 && !inner.headers.contains_key(&header.parent) {
            return Err(bad_op("saving a header whose parent is not stored"));
        }
        inner.headers.insert(
            header.hash,
            StoredHeader {
                header: header.clone(),
                verify_state: VerifyState::NotVerified,
            },
        );
        inner
            .children
            .entry(header.parent)
            .or_default()
            .push(header.hash);
        Ok(())
    }

    fn update_verified(&mut self, hash: &CryptoHash, state: VerifyState) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        let stored = inner
            .headers
            .get_mut(hash)
            .ok_or_else(|| bad_op("updating the verification state of an unknown header"))?;
        if !stored.verify_state.may_become(state) {
            return Err(bad_op("non-monotonic verification-state transition"));
        }
        stored.verify_state = state;
        Ok(())
    }

    fn change_best(&mut self, hash: &CryptoHash) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        // Rebuild the canonical index by walking parent links back to genesis.
        let mut walk = Vec::new();
        let mut cursor = *hash;
        loop {
            let stored = inner
                .headers
                .get(&cursor)
                .ok_or_else(|| bad_op("changing best to an unknown header"))?;
            walk.push(cursor);
            if stored.header.height.int() == 0 {
                break;
            }
            cursor = stored.header.parent;
        }
        walk.reverse();
        inner.canonical = walk;
        inner.best = Some(*hash);
        Ok(())
    }

    fn children(&self, hash: &CryptoHash) -> Result<Vec<CryptoHash>, StoreError> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .children
            .get(hash)
            .cloned()
            .unwrap_or_default())
    }

    fn block_bytes(&self, hash: &CryptoHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.0.lock().unwrap().blocks.get(hash).cloned())
    }

    fn put_block_bytes(&mut self, hash: &CryptoHash, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.0.lock().unwrap().blocks.insert(*hash, bytes);
        Ok(())
    }
}
