//! Assembling and running a replication node.
//!
//! A node is built in two steps. First, [`initialize`] is called once per data directory to
//! persist the genesis block and its snapshot. Then, on every startup, a [`NodeSpec`] is built with
//! the node's pluggable components and [`Configuration`], and [`NodeSpec::start`] spawns the
//! background threads and returns a [`Node`] handle. Dropping the handle shuts the threads down
//! gracefully.
//!
//! ## Threads
//!
//! A running node consists of four threads:
//! 1. The poller, which takes messages off the [`Network`] implementation and routes them to the
//!    other threads.
//! 2. The replication thread, which runs peer sync and block verification.
//! 3. The sync server, which answers other nodes' header and block requests.
//! 4. Optionally, the event bus, which invokes event handlers registered on the [`NodeSpec`].
//!
//! ## Log Events
//!
//! The node logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a [logging
//! implementation](https://docs.rs/log/latest/log/#available-logging-implementations).

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use borsh::BorshSerialize;
use typed_builder::TypedBuilder;

use crate::app::{App, ViewApp};
use crate::chain::core::{MinedBlock, ReplicationCore, ReplicationCoreConfiguration};
use crate::chain::policy::HeaderPolicy;
use crate::chain::reader::ChainReader;
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::networking::network::Network;
use crate::networking::receiving::start_polling;
use crate::state::manager::{SnapshotError, StorageManager};
use crate::state::pluggables::{HeaderStore, LedgerStoreFactory};
use crate::state::redo::RedoLog;
use crate::sync::engine::{SyncEngine, SyncEngineConfiguration};
use crate::sync::server::{SyncServer, SyncServerConfiguration};
use crate::types::block::Block;
use crate::types::data_types::ChainID;
use crate::types::header::VerifyState;

/// Parameters that tune a running node.
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.chain_id(...)`
    - `.initial_window(...)`
    - `.header_request_limit(...)`
    - `.response_limit(...)`
    - `.block_request_timeout(...)`
    - `.header_request_timeout(...)`
    - `.min_outbound(...)`
    - `.sync_quorum(...)`
    - `.confirmation_depth(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the chain ID of the ledger. Peers on other chains are refused. Required."))]
    pub chain_id: ChainID,
    #[builder(setter(doc = "Set the starting number of concurrent block requests per peer. The window grows with good \
    deliveries up to three times this value and halves on timeouts. Required."))]
    pub initial_window: u32,
    #[builder(setter(doc = "Set the number of headers requested per header request. Required."))]
    pub header_request_limit: u32,
    #[builder(setter(doc = "Set the upper bound on headers served per request, regardless of what a peer asks for. Required."))]
    pub response_limit: u32,
    #[builder(setter(doc = "Set the timeout after which an unanswered block request counts as lapsed. Required."))]
    pub block_request_timeout: Duration,
    #[builder(setter(doc = "Set the timeout after which an unanswered header request counts as lapsed. Required."))]
    pub header_request_timeout: Duration,
    #[builder(setter(doc = "Set how many outbound connections the node keeps topped up. Required."))]
    pub min_outbound: usize,
    #[builder(setter(doc = "Set how many peers must report end-of-chain before the node treats itself as synced. Zero \
    means the node starts out synced, which is appropriate for the founding node of a new chain. Required."))]
    pub sync_quorum: usize,
    #[builder(setter(doc = "Set how many headers back from the tip announcements reach, and how far below the tip \
    header sync re-anchors on reconnect. Required."))]
    pub confirmation_depth: u64,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl Into<(SyncEngineConfiguration, SyncServerConfiguration, ReplicationCoreConfiguration)>
    for Configuration
{
    fn into(
        self,
    ) -> (
        SyncEngineConfiguration,
        SyncServerConfiguration,
        ReplicationCoreConfiguration,
    ) {
        let engine_config = SyncEngineConfiguration {
            chain_id: self.chain_id,
            initial_window: self.initial_window,
            header_request_limit: self.header_request_limit,
            block_request_timeout: self.block_request_timeout,
            header_request_timeout: self.header_request_timeout,
            min_outbound: self.min_outbound,
        };
        let server_config = SyncServerConfiguration {
            chain_id: self.chain_id,
            response_limit: self.response_limit,
        };
        let core_config = ReplicationCoreConfiguration {
            sync_quorum: self.sync_quorum,
            confirmation_depth: self.confirmation_depth,
            header_request_limit: self.header_request_limit,
        };
        (engine_config, server_config, core_config)
    }
}

/// Stores all necessary parameters and trait implementations required to run a [Node].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.app(...)`
    - `.view_app(...)`
    - `.network(...)`
    - `.header_store(...)`
    - `.ledger_factory(...)`
    - `.policy(...)`
    - `.snapshot_root(...)`
    - `.configuration(...)`

    Optional:
    - `.on_insert_header(...)`
    - `.on_verify_block(...)`
    - `.on_invalidate_block(...)`
    - `.on_advance_tip(...)`
    - `.on_side_branch(...)`
    - `.on_create_snapshot(...)`
    - `.on_recycle_snapshot(...)`
    - `.on_add_mined_block(...)`
    - `.on_start_sync(...)`
    - `.on_peer_synced(...)`
    - `.on_sync_quorum(...)`
    - `.on_request_headers(...)`
    - `.on_receive_headers(...)`
    - `.on_request_block(...)`
    - `.on_receive_block(...)`
    - `.on_receive_transactions(...)`
    - `.on_receive_sync_request(...)`
    - `.on_send_sync_response(...)`
    - `.on_ban_peer(...)`
    - `.on_ban_address(...)`
"))]
pub struct NodeSpec<N, H, F, A, P, V>
where
    N: Network + 'static,
    H: HeaderStore,
    F: LedgerStoreFactory,
    A: App<F::Store>,
    P: HeaderPolicy,
    V: ViewApp<F::Store>,
{
    // Required parameters
    #[builder(setter(doc = "Set the block execution code. The argument must implement the [App](crate::app::App) trait. Required."))]
    app: A,
    #[builder(setter(doc = "Set the read-only query code. The argument must implement the [ViewApp](crate::app::ViewApp) trait. Required."))]
    view_app: V,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of the node's header index. The argument must implement the [HeaderStore](crate::state::pluggables::HeaderStore) trait. Required."))]
    header_store: H,
    #[builder(setter(doc = "Set the factory for ledger state instances. The argument must implement the [LedgerStoreFactory](crate::state::pluggables::LedgerStoreFactory) trait. Required."))]
    ledger_factory: F,
    #[builder(setter(doc = "Set the header acceptance and chain selection policy. The argument must implement the [HeaderPolicy](crate::chain::policy::HeaderPolicy) trait. Required."))]
    policy: P,
    #[builder(setter(doc = "Set the directory under which snapshot dumps and redo logs are kept. Required."))]
    snapshot_root: PathBuf,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a node. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertHeaderEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertHeaderEvent>),
    doc = "Register a handler closure to be invoked after a header is persisted. Optional."))]
    on_insert_header: Option<HandlerPtr<InsertHeaderEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VerifyBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VerifyBlockEvent>),
    doc = "Register a handler closure to be invoked after a block passes verification. Optional."))]
    on_verify_block: Option<HandlerPtr<VerifyBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InvalidateBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InvalidateBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is marked invalid. Optional."))]
    on_invalidate_block: Option<HandlerPtr<InvalidateBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AdvanceTipEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AdvanceTipEvent>),
    doc = "Register a handler closure to be invoked after the canonical tip advances. Optional."))]
    on_advance_tip: Option<HandlerPtr<AdvanceTipEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SideBranchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SideBranchEvent>),
    doc = "Register a handler closure to be invoked after a verified block lands on a side branch. Optional."))]
    on_side_branch: Option<HandlerPtr<SideBranchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CreateSnapshotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CreateSnapshotEvent>),
    doc = "Register a handler closure to be invoked after a block's snapshot is written. Optional."))]
    on_create_snapshot: Option<HandlerPtr<CreateSnapshotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RecycleSnapshotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RecycleSnapshotEvent>),
    doc = "Register a handler closure to be invoked after a snapshot recycling pass. Optional."))]
    on_recycle_snapshot: Option<HandlerPtr<RecycleSnapshotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AddMinedBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AddMinedBlockEvent>),
    doc = "Register a handler closure to be invoked after a locally produced block is adopted. Optional."))]
    on_add_mined_block: Option<HandlerPtr<AddMinedBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after header sync with a new peer starts. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PeerSyncedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PeerSyncedEvent>),
    doc = "Register a handler closure to be invoked after a peer reports end-of-chain. Optional."))]
    on_peer_synced: Option<HandlerPtr<PeerSyncedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SyncQuorumEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SyncQuorumEvent>),
    doc = "Register a handler closure to be invoked after enough peers report end-of-chain and the node starts serving queries. Optional."))]
    on_sync_quorum: Option<HandlerPtr<SyncQuorumEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RequestHeadersEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RequestHeadersEvent>),
    doc = "Register a handler closure to be invoked after the node sends a header request. Optional."))]
    on_request_headers: Option<HandlerPtr<RequestHeadersEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveHeadersEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveHeadersEvent>),
    doc = "Register a handler closure to be invoked after the node receives headers from a peer. Optional."))]
    on_receive_headers: Option<HandlerPtr<ReceiveHeadersEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RequestBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RequestBlockEvent>),
    doc = "Register a handler closure to be invoked after the node sends a block request. Optional."))]
    on_request_block: Option<HandlerPtr<RequestBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBlockEvent>),
    doc = "Register a handler closure to be invoked after the node receives a requested block body. Optional."))]
    on_receive_block: Option<HandlerPtr<ReceiveBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveTransactionsEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveTransactionsEvent>),
    doc = "Register a handler closure to be invoked after the node receives loose transactions from a peer. Optional."))]
    on_receive_transactions: Option<HandlerPtr<ReceiveTransactionsEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>),
    doc = "Register a handler closure to be invoked after the node receives a sync request from a peer. Optional."))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendSyncResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendSyncResponseEvent>),
    doc = "Register a handler closure to be invoked after the node sends a sync response to a peer. Optional."))]
    on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BanPeerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BanPeerEvent>),
    doc = "Register a handler closure to be invoked after a peer is banned. Optional."))]
    on_ban_peer: Option<HandlerPtr<BanPeerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BanAddressEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BanAddressEvent>),
    doc = "Register a handler closure to be invoked after an address is banned. Optional."))]
    on_ban_address: Option<HandlerPtr<BanAddressEvent>>,
}

impl<N, H, F, A, P, V> NodeSpec<N, H, F, A, P, V>
where
    N: Network + 'static,
    H: HeaderStore,
    F: LedgerStoreFactory,
    A: App<F::Store>,
    P: HeaderPolicy,
    V: ViewApp<F::Store>,
{
    /// Starts all threads and channels associated with running a node, and returns the handles to
    /// them in a [Node] struct.
    ///
    /// Fails if the snapshot directories under `snapshot_root` cannot be opened.
    pub fn start(self) -> Result<Node<H, F, V>, SnapshotError> {
        let manager = Arc::new(StorageManager::open(
            self.ledger_factory,
            self.header_store.clone(),
            &self.snapshot_root,
        )?);
        let synced = Arc::new(AtomicBool::new(false));

        let log_events = self.configuration.log_events;
        let (engine_config, server_config, core_config) = self.configuration.into();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, sync_requests, sync_responses) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_insert_header,
            self.on_verify_block,
            self.on_invalidate_block,
            self.on_advance_tip,
            self.on_side_branch,
            self.on_create_snapshot,
            self.on_recycle_snapshot,
            self.on_add_mined_block,
            self.on_start_sync,
            self.on_peer_synced,
            self.on_sync_quorum,
            self.on_request_headers,
            self.on_receive_headers,
            self.on_request_block,
            self.on_receive_block,
            self.on_receive_transactions,
            self.on_receive_sync_request,
            self.on_send_sync_response,
            self.on_ban_peer,
            self.on_ban_address,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (sync_server_shutdown, sync_server_shutdown_receiver) = mpsc::channel();
        let sync_server = SyncServer::new(
            server_config,
            self.header_store.clone(),
            manager.clone(),
            sync_requests,
            self.network.clone(),
            sync_server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let engine = SyncEngine::new(engine_config, self.network, event_publisher.clone());
        let (mined_sender, mined_receiver) = mpsc::channel();
        let (replication_shutdown, replication_shutdown_receiver) = mpsc::channel();
        let replication = ReplicationCore::new(
            core_config,
            self.header_store.clone(),
            manager.clone(),
            self.app,
            self.policy,
            engine,
            synced.clone(),
            event_publisher.clone(),
        )
        .start(sync_responses, mined_receiver, replication_shutdown_receiver);

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let event_bus = if !event_handlers.is_empty() {
            Some(start_event_bus(
                event_handlers,
                event_subscriber.unwrap(), // Safety: should be Some(...).
                event_bus_shutdown_receiver.unwrap(), // Safety: should be Some(...).
            ))
        } else {
            None
        };

        Ok(Node {
            chain_reader: ChainReader::new(
                self.header_store,
                manager.clone(),
                Arc::new(self.view_app),
                synced,
            ),
            manager,
            mined_sender,
            event_publisher,
            poller: Some(poller),
            poller_shutdown,
            replication: Some(replication),
            replication_shutdown,
            sync_server: Some(sync_server),
            sync_server_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a running node. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Node<H: HeaderStore, F: LedgerStoreFactory, V: ViewApp<F::Store>> {
    chain_reader: ChainReader<H, F, V>,
    manager: Arc<StorageManager<F, H>>,
    mined_sender: Sender<MinedBlock<F::Store>>,
    event_publisher: Option<Sender<Event>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    replication: Option<JoinHandle<()>>,
    replication_shutdown: Sender<()>,
    sync_server: Option<JoinHandle<()>>,
    sync_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

/// Initializes a data directory with the `genesis` block and the ledger `state` it declares.
///
/// The genesis header is persisted as verified and canonical, and `state` is dumped as the
/// genesis snapshot. Must be called exactly once per data directory, before the first
/// [`NodeSpec::start`] against it.
pub fn initialize<H: HeaderStore, F: LedgerStoreFactory>(
    mut header_store: H,
    ledger_factory: F,
    snapshot_root: &Path,
    genesis: Block,
    state: F::Store,
) -> Result<(), SnapshotError> {
    let hash = genesis.hash();
    let bytes = genesis.try_to_vec()?;
    header_store
        .save_header(&genesis.header)
        .map_err(SnapshotError::Store)?;
    header_store
        .update_verified(&hash, VerifyState::Verified)
        .map_err(SnapshotError::Store)?;
    header_store
        .change_best(&hash)
        .map_err(SnapshotError::Store)?;
    header_store
        .put_block_bytes(&hash, bytes)
        .map_err(SnapshotError::Store)?;

    let manager = StorageManager::open(ledger_factory, header_store, snapshot_root)?;
    manager.create_snapshot(state, &hash, None)
}

impl<H: HeaderStore, F: LedgerStoreFactory, V: ViewApp<F::Store>> Node<H, F, V> {
    /// Hand a locally produced block to the replication thread for adoption.
    ///
    /// `store` must be the state instance the block was built against, with the block's effects
    /// already applied, and `redo` the log of those effects. The block is adopted without
    /// re-execution; the [AddMinedBlockEvent] fires once the snapshot is on disk.
    pub fn add_mined_block(&self, block: Block, store: F::Store, redo: RedoLog) {
        let _ = self.mined_sender.send(MinedBlock { block, store, redo });
    }

    /// Returns a [ChainReader] which can be used to query headers and per-block ledger state.
    pub fn chain_reader(&self) -> &ChainReader<H, F, V> {
        &self.chain_reader
    }

    /// Delete physical snapshot dumps to reclaim disk. The genesis dump and dumps of blocks
    /// currently checked out by queries are kept; every deleted dump stays reconstructible from
    /// the genesis dump and the redo chain. Returns the number of dumps deleted.
    pub fn recycle_snapshots(&self) -> Result<usize, SnapshotError> {
        let deleted = self.manager.recycle_snapshot()?;
        Event::publish(
            &self.event_publisher,
            Event::RecycleSnapshot(RecycleSnapshotEvent {
                timestamp: SystemTime::now(),
                deleted,
            }),
        );
        Ok(deleted)
    }
}

impl<H: HeaderStore, F: LedgerStoreFactory, V: ViewApp<F::Store>> Drop for Node<H, F, V> {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads make
        // assumptions about the validity of their channels based on this. The replication and sync
        // server threads receive messages from the poller, and assume that the poller will live
        // longer than them.

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap());
        if self.event_bus.is_some() {
            self.event_bus.take().unwrap().join().unwrap();
        }

        self.replication_shutdown.send(()).unwrap();
        self.replication.take().unwrap().join().unwrap();

        self.sync_server_shutdown.send(()).unwrap();
        self.sync_server.take().unwrap().join().unwrap();

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();
    }
}
