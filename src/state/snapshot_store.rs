//! On-disk layout of the snapshot store: full dumps addressed by hex block hash under `dumps/`,
//! redo logs under `logs/` with a `.redo` suffix, and a scratch area for private copies.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::redo::RedoLog;
use crate::types::data_types::CryptoHash;

const DUMPS_DIR: &str = "dumps";
const LOGS_DIR: &str = "logs";
const TMP_DIR: &str = "tmp";
const REDO_SUFFIX: &str = "redo";

/// Paths and file formats of the snapshot store. Purely mechanical: which physical artifacts
/// exist for which block, and where. All policy (refcounts, reconstruction, recycling) lives in
/// the [manager](crate::state::manager).
pub(crate) struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open (creating directories if needed) the snapshot store rooted at `root`.
    pub(crate) fn open(root: &Path) -> io::Result<SnapshotStore> {
        fs::create_dir_all(root.join(DUMPS_DIR))?;
        fs::create_dir_all(root.join(LOGS_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(SnapshotStore {
            root: root.to_path_buf(),
        })
    }

    pub(crate) fn dump_path(&self, block: &CryptoHash) -> PathBuf {
        self.root.join(DUMPS_DIR).join(block.hex())
    }

    pub(crate) fn redo_path(&self, block: &CryptoHash) -> PathBuf {
        self.root
            .join(LOGS_DIR)
            .join(format!("{}.{}", block.hex(), REDO_SUFFIX))
    }

    /// A path in the scratch area, unique per `tag`. Callers own cleanup.
    pub(crate) fn tmp_path(&self, tag: &str) -> PathBuf {
        self.root.join(TMP_DIR).join(tag)
    }

    pub(crate) fn has_dump(&self, block: &CryptoHash) -> bool {
        self.dump_path(block).is_file()
    }

    pub(crate) fn delete_dump(&self, block: &CryptoHash) -> io::Result<()> {
        fs::remove_file(self.dump_path(block))
    }

    /// Hashes of every block that currently has a physical dump.
    pub(crate) fn dumped_blocks(&self) -> io::Result<Vec<CryptoHash>> {
        let mut blocks = Vec::new();
        for entry in fs::read_dir(self.root.join(DUMPS_DIR))? {
            let entry = entry?;
            let name = entry.file_name();
            // Skip foreign files rather than failing: the dumps directory is ours, but a stray
            // file must not wedge recycling.
            if let Some(hash) = parse_hex_hash(&name.to_string_lossy()) {
                blocks.push(hash);
            }
        }
        Ok(blocks)
    }

    /// Persist `redo` as the redo log of `block`.
    pub(crate) fn write_redo(&self, block: &CryptoHash, redo: &RedoLog) -> io::Result<()> {
        let bytes = redo
            .try_to_vec()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(self.redo_path(block), bytes)
    }

    /// Read back the redo log of `block`. `Ok(None)` if no log exists.
    pub(crate) fn read_redo(&self, block: &CryptoHash) -> io::Result<Option<RedoLog>> {
        let path = self.redo_path(block);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let redo = RedoLog::deserialize(&mut bytes.as_slice())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(Some(redo))
    }
}

fn parse_hex_hash(name: &str) -> Option<CryptoHash> {
    let bytes = hex::decode(name).ok()?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    Some(CryptoHash::new(bytes))
}
