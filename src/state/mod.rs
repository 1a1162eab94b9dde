//! Per-block state snapshots: pluggable storage traits, redo logs, the on-disk snapshot store,
//! and the reference-counted storage manager.
//!
//! The central promise of this module is that for every verified block `H`,
//! `snapshot(H) == state-after-executing(H)`, and that this holds whether the snapshot is read
//! from a full dump on disk or reconstructed from the nearest ancestor dump by replaying redo
//! logs forward.

pub mod manager;

pub mod pluggables;

pub mod redo;

pub mod snapshot_store;
