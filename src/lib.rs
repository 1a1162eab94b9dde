//! Rust library for building peer-replicated append-only ledgers. chainrep keeps a set of nodes
//! holding the same chain of blocks, and keeps every verified block's ledger state independently
//! queryable.
//!
//! ## The replication engine and the pluggable components
//!
//! chainrep is a library, not a binary. It provides the replication engine: header sync with
//! windowed per-peer flow control and graduated banning, fork-aware block verification with
//! pluggable chain selection, and content-addressed snapshot storage with redo logs. Users provide
//! the pluggable components:
//! - An [App](app::App), the deterministic block execution code, and a [ViewApp](app::ViewApp),
//!   the read-only query code.
//! - A [Network](networking::network::Network) implementation for peer-to-peer messaging.
//! - A [HeaderStore](state::pluggables::HeaderStore) for the header index and a
//!   [LedgerStoreFactory](state::pluggables::LedgerStoreFactory) for ledger state instances.
//! - Optionally, a [HeaderPolicy](chain::policy::HeaderPolicy) for header acceptance and chain
//!   selection. The default prefers the higher chain and keeps the incumbent on ties.
//!
//! ## Getting started
//!
//! Call [initialize](node::initialize) once per data directory to persist the genesis
//! block, then build a [NodeSpec](node::NodeSpec) and call
//! [start](node::NodeSpec::start) to get a running [Node](node::Node). The returned handle exposes
//! [chain_reader](node::Node::chain_reader) for queries against any verified block's state,
//! [add_mined_block](node::Node::add_mined_block) for adopting locally produced blocks, and
//! [recycle_snapshots](node::Node::recycle_snapshots) for reclaiming disk from snapshot dumps
//! that can be reconstructed on demand. Dropping the handle shuts the node down.

pub mod app;

pub mod chain;

pub(crate) mod event_bus;

pub mod events;

pub(crate) mod logging;

pub mod networking;

pub mod node;

pub mod state;

pub mod sync;

pub mod types;
