//! Fork-aware chain replication: header validation and persistence, body verification, canonical
//! tip selection, and the read-only query surface.

pub mod policy;

pub mod reader;

pub(crate) mod core;
