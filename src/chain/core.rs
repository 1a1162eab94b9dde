//! The replication core: the single serial loop that turns peer messages into persisted,
//! verified chain state.
//!
//! Everything that mutates the header store or creates snapshots happens on this one thread, so
//! no header/block operation ever observes another in a half-applied state. The loop drains, in
//! order: transport bookkeeping, incoming sync responses, locally mined blocks, and then at most
//! one body verification per iteration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;
use log::{error, warn};

use crate::app::{App, ExecuteError};
use crate::chain::policy::HeaderPolicy;
use crate::events::{
    AddMinedBlockEvent, AdvanceTipEvent, CreateSnapshotEvent, Event, InsertHeaderEvent,
    InvalidateBlockEvent, PeerSyncedEvent, SideBranchEvent, SyncQuorumEvent, VerifyBlockEvent,
};
use crate::networking::network::Network;
use crate::state::manager::{SnapshotError, StorageManager};
use crate::state::pluggables::{HeaderStore, LedgerStoreFactory, StoreError};
use crate::state::redo::{RecordingStore, RedoLog};
use crate::sync::engine::{BlockVerdict, HeadersVerdict, SyncEngine};
use crate::sync::messages::{BlockResponse, Headers, SyncResponse};
use crate::sync::peer::BanLevel;
use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash},
    header::{Header, VerifyState},
};

/// Configuration for the [`ReplicationCore`].
pub(crate) struct ReplicationCoreConfiguration {
    /// How many peers must report end-of-chain before this node treats itself as synced. Zero
    /// means the node starts out synced (e.g. the founding node of a new chain).
    pub(crate) sync_quorum: usize,

    /// How many headers back from the tip announcements reach, and how far below the tip header
    /// sync re-anchors on reconnect.
    pub(crate) confirmation_depth: u64,

    /// `limit` the engine uses for header requests; re-anchoring on `ParentNotFound` steps down
    /// by this much.
    pub(crate) header_request_limit: u32,
}

/// A locally produced block travelling from [`Node::add_mined_block`](crate::node::Node) to the
/// replication thread, together with the state instance and redo log its production built.
pub(crate) struct MinedBlock<S> {
    pub(crate) block: Block,
    pub(crate) store: S,
    pub(crate) redo: RedoLog,
}

pub(crate) struct ReplicationCore<N, H, F, A, P>
where
    N: Network + 'static,
    H: HeaderStore,
    F: LedgerStoreFactory,
    A: App<F::Store>,
    P: HeaderPolicy,
{
    config: ReplicationCoreConfiguration,
    headers: H,
    manager: Arc<StorageManager<F, H>>,
    app: A,
    policy: P,
    engine: SyncEngine<N>,
    /// Bodies stored and awaiting verification, oldest first, with the delivering peer (`None`
    /// for cascade re-queues and mined blocks).
    verify_queue: VecDeque<(CryptoHash, Option<VerifyingKey>)>,
    synced: Arc<AtomicBool>,
    last_maintenance: Instant,
    event_publisher: Option<Sender<Event>>,
}

/// Why a header batch was not persisted.
enum HeaderBatchFault {
    /// The first new header's parent is unknown; the caller re-anchors lower and re-requests.
    ParentNotFound,

    /// A header failed a structural check (hash integrity, linkage, height). Only a broken or
    /// hostile peer produces these.
    Broken { what: String },

    /// A header failed the pluggable policy. Penalized, but boundedly: a differing policy is
    /// not proof of hostility.
    Rejected { what: String },

    Store(StoreError),
}

impl<N, H, F, A, P> ReplicationCore<N, H, F, A, P>
where
    N: Network + 'static,
    H: HeaderStore,
    F: LedgerStoreFactory,
    A: App<F::Store>,
    P: HeaderPolicy,
{
    pub(crate) fn new(
        config: ReplicationCoreConfiguration,
        headers: H,
        manager: Arc<StorageManager<F, H>>,
        app: A,
        policy: P,
        engine: SyncEngine<N>,
        synced: Arc<AtomicBool>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        if config.sync_quorum == 0 {
            synced.store(true, Ordering::SeqCst);
        }
        Self {
            config,
            headers,
            manager,
            app,
            policy,
            engine,
            verify_queue: VecDeque::new(),
            synced,
            last_maintenance: Instant::now()
                .checked_sub(Duration::from_secs(3600))
                .unwrap_or_else(Instant::now),
            event_publisher,
        }
    }

    pub(crate) fn start(
        mut self,
        responses: Receiver<(VerifyingKey, SyncResponse)>,
        mined: Receiver<MinedBlock<F::Store>>,
        shutdown_signal: Receiver<()>,
    ) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Replication thread disconnected from main thread")
                }
            }

            let mut progressed = false;

            self.tick_transport();

            match responses.try_recv() {
                Ok((origin, response)) => {
                    progressed = true;
                    match response {
                        SyncResponse::Headers(msg) => {
                            if let HeadersVerdict::Accepted(msg) = self.engine.on_headers(origin, msg)
                            {
                                self.handle_headers(origin, msg);
                            }
                        }
                        SyncResponse::BlockResponse(msg) => {
                            if let BlockVerdict::Accepted(msg) = self.engine.on_block(origin, msg) {
                                self.handle_block(origin, msg);
                            }
                        }
                        SyncResponse::Transactions(msg) => {
                            // Count-checked and surfaced for an external mempool; the engine
                            // itself does nothing further with loose transactions.
                            let _ = self.engine.on_transactions(origin, msg);
                        }
                    }
                }
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => return,
            }

            match mined.try_recv() {
                Ok(mined_block) => {
                    progressed = true;
                    self.handle_mined(mined_block);
                }
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => return,
            }

            if self.verify_next() {
                progressed = true;
            }

            if !progressed {
                thread::yield_now();
            }
        })
    }

    /// Periodic transport upkeep: retire expired bans, top up outbound connections, register
    /// newly connected peers and start header sync with them, and lapse stale requests.
    fn tick_transport(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_maintenance) < Duration::from_millis(100) {
            return;
        }
        self.last_maintenance = now;

        self.engine.maintain_outbound(now);
        self.engine.expire_stale(now);

        let anchor = self.sync_anchor();
        for peer in self.engine.refresh_peers(anchor) {
            if let Err(err) = self.engine.request_headers_default(peer, anchor) {
                warn!("could not start header sync with a new peer: {}", err);
            }
        }
    }

    /// Where header sync starts: a little below the current best height, so recent forks are
    /// re-offered after a reconnect. Never below height 1: genesis is shared by initialization
    /// and does not travel.
    fn sync_anchor(&self) -> BlockHeight {
        match self.headers.best_header() {
            Ok(Some(best)) => best
                .header
                .height
                .saturating_sub(self.config.confirmation_depth)
                .max(BlockHeight::new(1)),
            Ok(None) => BlockHeight::new(1),
            Err(err) => {
                error!("could not read the best header: {}", err);
                BlockHeight::new(1)
            }
        }
    }

    fn handle_headers(&mut self, origin: VerifyingKey, msg: Headers) {
        if let Some(error) = &msg.error {
            warn!("peer refused a header request: {:?}", error);
            return;
        }
        let solicited = msg.request.is_some();

        match self.verify_and_save_headers(&msg.headers) {
            Ok(to_fetch) => {
                if !to_fetch.is_empty() {
                    self.engine.request_blocks(to_fetch, origin);
                }
                if solicited {
                    if msg.count == 0 {
                        self.peer_reached_end(origin);
                    } else if let Some(last) = msg.headers.last() {
                        let next = last.height + 1;
                        if let Err(err) = self.engine.request_headers_default(origin, next) {
                            warn!("could not continue header sync: {}", err);
                        }
                    }
                }
            }
            Err(HeaderBatchFault::ParentNotFound) => self.reanchor(origin),
            Err(HeaderBatchFault::Broken { what }) => {
                warn!("peer sent a structurally broken header: {}", what);
                self.engine.ban(origin, BanLevel::Forever);
            }
            Err(HeaderBatchFault::Rejected { what }) => {
                warn!("peer sent a policy-violating header: {}", what);
                self.engine.ban(origin, BanLevel::Day);
            }
            Err(HeaderBatchFault::Store(err)) => {
                error!("storage fault while saving headers: {}", err);
            }
        }
    }

    /// Structurally validate `batch` in order and persist every new header as `NotVerified`.
    /// Returns the hashes whose bodies still need fetching: new headers, plus known headers
    /// that never got a body.
    fn verify_and_save_headers(
        &mut self,
        batch: &[Header],
    ) -> Result<Vec<CryptoHash>, HeaderBatchFault> {
        let mut to_fetch = Vec::new();
        for header in batch {
            if header.height.int() == 0 {
                return Err(HeaderBatchFault::Broken {
                    what: "peer offered a genesis header".to_string(),
                });
            }
            if let Some(known) = self
                .headers
                .header(&header.hash)
                .map_err(HeaderBatchFault::Store)?
            {
                let has_body = self
                    .headers
                    .has_block(&header.hash)
                    .map_err(HeaderBatchFault::Store)?;
                if known.verify_state == VerifyState::NotVerified && !has_body {
                    to_fetch.push(header.hash);
                }
                continue;
            }

            let parent = self
                .headers
                .header(&header.parent)
                .map_err(HeaderBatchFault::Store)?
                .ok_or(HeaderBatchFault::ParentNotFound)?;

            if !header.is_correct() {
                return Err(HeaderBatchFault::Broken {
                    what: format!("header {} does not hash to its claimed hash", header.hash),
                });
            }
            if header.height != parent.header.height + 1 {
                return Err(HeaderBatchFault::Broken {
                    what: format!(
                        "header {} at height {} has a parent at height {}",
                        header.hash, header.height, parent.header.height
                    ),
                });
            }
            self.policy
                .validate_header(header, &parent.header)
                .map_err(|violation| HeaderBatchFault::Rejected {
                    what: violation.what,
                })?;

            self.headers
                .save_header(header)
                .map_err(HeaderBatchFault::Store)?;
            Event::publish(
                &self.event_publisher,
                Event::InsertHeader(InsertHeaderEvent {
                    timestamp: SystemTime::now(),
                    header: header.clone(),
                }),
            );

            if parent.verify_state == VerifyState::Invalid {
                self.invalidate(&header.hash, header.height);
            } else {
                to_fetch.push(header.hash);
            }
        }
        Ok(to_fetch)
    }

    /// The peer replied with an empty run: it has nothing above our anchor. One more peer
    /// reaching end-of-chain may complete the sync quorum.
    fn peer_reached_end(&mut self, peer: VerifyingKey) {
        if !self.engine.mark_synced(&peer) {
            return;
        }
        let height = match self.headers.best_header() {
            Ok(Some(best)) => best.header.height,
            _ => BlockHeight::new(0),
        };
        Event::publish(
            &self.event_publisher,
            Event::PeerSynced(PeerSyncedEvent {
                timestamp: SystemTime::now(),
                peer,
                height,
            }),
        );
        if !self.synced.load(Ordering::SeqCst)
            && self.engine.synced_count() >= self.config.sync_quorum
        {
            self.synced.store(true, Ordering::SeqCst);
            Event::publish(
                &self.event_publisher,
                Event::SyncQuorum(SyncQuorumEvent {
                    timestamp: SystemTime::now(),
                    height,
                }),
            );
        }
    }

    /// A batch's parent was unknown: step the request anchor down by one request's worth of
    /// headers and ask again, converging on the fork point.
    fn reanchor(&mut self, peer: VerifyingKey) {
        let from = self
            .engine
            .anchor(&peer)
            .unwrap_or(BlockHeight::new(1))
            .saturating_sub(self.config.header_request_limit as u64)
            .max(BlockHeight::new(1));
        if let Err(err) = self.engine.request_headers_default(peer, from) {
            warn!("could not re-anchor header sync: {}", err);
        }
    }

    fn handle_block(&mut self, origin: VerifyingKey, msg: BlockResponse) {
        let block = match Block::deserialize(&mut &*msg.block_bytes) {
            Ok(block) => block,
            Err(_) => {
                warn!("peer sent an undecodable block body");
                self.engine.ban(origin, BanLevel::Forever);
                return;
            }
        };
        if block.hash() != msg.hash || !block.is_well_formed() {
            warn!("peer sent a malformed block body for {}", msg.hash);
            self.engine.ban(origin, BanLevel::Forever);
            return;
        }

        match self.headers.header(&msg.hash) {
            Ok(Some(_)) => (),
            // The header came and went (or never arrived); nothing to attach the body to.
            Ok(None) => return,
            Err(err) => {
                error!("storage fault while looking up a header: {}", err);
                return;
            }
        }

        if let Err(err) = self.headers.put_block_bytes(&msg.hash, msg.block_bytes) {
            error!("storage fault while saving block bytes: {}", err);
            return;
        }
        self.verify_queue.push_back((msg.hash, Some(origin)));
    }

    /// Verify at most one queued body. Returns whether any work was done.
    fn verify_next(&mut self) -> bool {
        let (hash, origin) = match self.verify_queue.pop_front() {
            Some(entry) => entry,
            None => return false,
        };

        let stored = match self.headers.header(&hash) {
            Ok(Some(stored)) => stored,
            Ok(None) => return true,
            Err(err) => {
                error!("storage fault while looking up a header: {}", err);
                return true;
            }
        };
        if stored.verify_state != VerifyState::NotVerified {
            return true;
        }

        let parent = match self.headers.header(&stored.header.parent) {
            Ok(Some(parent)) => parent,
            Ok(None) => {
                error!("header {} is stored without its parent", hash);
                return true;
            }
            Err(err) => {
                error!("storage fault while looking up a parent: {}", err);
                return true;
            }
        };
        match parent.verify_state {
            VerifyState::Invalid => {
                self.invalidate(&hash, stored.header.height);
                self.queue_children(&hash);
                return true;
            }
            // The parent's own body has not been verified yet. The block stays stored; it is
            // re-queued when the parent's verification completes.
            VerifyState::NotVerified => return true,
            VerifyState::Verified => (),
        }

        self.verify_body(hash, stored.header, origin);
        true
    }

    /// Execute the block against a scratch copy of its parent's snapshot and compare the
    /// resulting digests bit-for-bit with the header's claims.
    fn verify_body(&mut self, hash: CryptoHash, header: Header, origin: Option<VerifyingKey>) {
        let block = match self.headers.block_bytes(&hash) {
            Ok(Some(bytes)) => match Block::deserialize(&mut &*bytes) {
                Ok(block) => block,
                Err(_) => {
                    error!("stored block bytes for {} no longer decode", hash);
                    return;
                }
            },
            Ok(None) => return,
            Err(err) => {
                error!("storage fault while reading block bytes: {}", err);
                return;
            }
        };

        let scratch = match self.manager.create_storage("verify", Some(&header.parent)) {
            Ok(scratch) => scratch,
            Err(SnapshotError::NotFound { block }) => {
                warn!("parent snapshot of {} is not reconstructible (missing {})", hash, block);
                return;
            }
            Err(err) => {
                error!("could not build a verification scratch store: {}", err);
                return;
            }
        };
        let mut recording = RecordingStore::new(scratch);

        let outcome = match self.app.execute_block(&block, &mut recording) {
            Ok(outcome) => outcome,
            Err(ExecuteError::Store(err)) => {
                error!("store fault while executing {}: {}", hash, err);
                return;
            }
            Err(err) => {
                warn!("block {} rejected by the application: {}", hash, err);
                self.reject(hash, header.height, origin);
                return;
            }
        };
        if outcome.state_digest != header.state_digest
            || outcome.receipts_digest != header.receipts_digest
        {
            warn!("block {} execution digests do not match its header", hash);
            self.reject(hash, header.height, origin);
            return;
        }

        let (store, redo) = recording.into_parts();
        if let Err(err) = self.manager.create_snapshot(store, &hash, Some(&redo)) {
            error!("could not snapshot {}: {}", hash, err);
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::CreateSnapshot(CreateSnapshotEvent {
                timestamp: SystemTime::now(),
                block: hash,
            }),
        );
        if let Err(err) = self.headers.update_verified(&hash, VerifyState::Verified) {
            error!("could not mark {} verified: {}", hash, err);
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::VerifyBlock(VerifyBlockEvent {
                timestamp: SystemTime::now(),
                block: hash,
                height: header.height,
            }),
        );

        self.advance_tip(&header);
        self.queue_children(&hash);
    }

    /// A verified block either displaces the canonical tip or starts (or extends) a side
    /// branch. Either way its snapshot stays queryable.
    fn advance_tip(&mut self, candidate: &Header) {
        let best = match self.headers.best_header() {
            Ok(best) => best,
            Err(err) => {
                error!("could not read the best header: {}", err);
                return;
            }
        };
        let displaces = match &best {
            Some(best) => self.policy.better(candidate, &best.header),
            None => true,
        };
        if displaces {
            if let Err(err) = self.headers.change_best(&candidate.hash) {
                error!("could not move the canonical tip: {}", err);
                return;
            }
        }

        // Before the sync quorum the chain is still provisional: no announcements, no tip
        // events.
        if !self.synced.load(Ordering::SeqCst) {
            return;
        }
        if displaces {
            Event::publish(
                &self.event_publisher,
                Event::AdvanceTip(AdvanceTipEvent {
                    timestamp: SystemTime::now(),
                    block: candidate.hash,
                    height: candidate.height,
                }),
            );
            match self.canonical_tail() {
                Ok(tail) => self.engine.announce_headers(&tail),
                Err(err) => error!("could not assemble a tip announcement: {}", err),
            }
        } else {
            Event::publish(
                &self.event_publisher,
                Event::SideBranch(SideBranchEvent {
                    timestamp: SystemTime::now(),
                    block: candidate.hash,
                    height: candidate.height,
                }),
            );
        }
    }

    /// The last `confirmation_depth` canonical headers, oldest first.
    fn canonical_tail(&self) -> Result<Vec<Header>, StoreError> {
        let best = match self.headers.best_header()? {
            Some(best) => best,
            None => return Ok(Vec::new()),
        };
        let start = best
            .header
            .height
            .saturating_sub(self.config.confirmation_depth.saturating_sub(1))
            .max(BlockHeight::new(1));
        let mut tail = Vec::new();
        let mut height = start;
        while height.int() <= best.header.height.int() {
            if let Some(hash) = self.headers.canonical_at(height)? {
                if let Some(stored) = self.headers.header(&hash)? {
                    tail.push(stored.header);
                }
            }
            height += 1;
        }
        Ok(tail)
    }

    /// Mark a block `Invalid` after failed execution and penalize the peer that delivered it.
    /// The ban is bounded: advertising a block from a losing fork is not proof of hostility.
    fn reject(&mut self, hash: CryptoHash, height: BlockHeight, origin: Option<VerifyingKey>) {
        self.invalidate(&hash, height);
        self.queue_children(&hash);
        if let Some(origin) = origin {
            if self.engine.is_registered(&origin) {
                self.engine.ban(origin, BanLevel::Day);
            }
        }
    }

    fn invalidate(&mut self, hash: &CryptoHash, height: BlockHeight) {
        if let Err(err) = self.headers.update_verified(hash, VerifyState::Invalid) {
            error!("could not mark {} invalid: {}", hash, err);
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::InvalidateBlock(InvalidateBlockEvent {
                timestamp: SystemTime::now(),
                block: *hash,
                height,
            }),
        );
    }

    /// Re-queue the stored children of a just-decided block at the front of the verification
    /// queue, so a long branch cascades without re-fetching.
    fn queue_children(&mut self, hash: &CryptoHash) {
        let children = match self.headers.children(hash) {
            Ok(children) => children,
            Err(err) => {
                error!("storage fault while listing children: {}", err);
                return;
            }
        };
        for child in children {
            let has_body = self.headers.has_block(&child).unwrap_or(false);
            let undecided = matches!(
                self.headers.header(&child),
                Ok(Some(stored)) if stored.verify_state == VerifyState::NotVerified
            );
            if has_body && undecided {
                self.verify_queue.push_front((child, None));
            }
        }
    }

    /// Adopt a locally produced block: the caller already executed it, so its state instance
    /// and redo log come with it and no re-execution happens.
    fn handle_mined(&mut self, mined: MinedBlock<F::Store>) {
        let MinedBlock { block, store, redo } = mined;
        if !block.is_well_formed() {
            warn!("discarding a malformed locally produced block");
            return;
        }
        let hash = block.hash();
        let header = block.header.clone();

        let block_bytes = match block.try_to_vec() {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("could not encode a locally produced block: {}", err);
                return;
            }
        };
        if let Err(err) = self.headers.save_header(&header) {
            error!("could not save a locally produced header: {}", err);
            return;
        }
        if let Err(err) = self.headers.put_block_bytes(&hash, block_bytes) {
            error!("could not save locally produced block bytes: {}", err);
            return;
        }
        if let Err(err) = self.manager.create_snapshot(store, &hash, Some(&redo)) {
            error!("could not snapshot a locally produced block: {}", err);
            return;
        }
        if let Err(err) = self.headers.update_verified(&hash, VerifyState::Verified) {
            error!("could not mark a locally produced block verified: {}", err);
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::AddMinedBlock(AddMinedBlockEvent {
                timestamp: SystemTime::now(),
                block: hash,
                height: header.height,
            }),
        );
        self.advance_tip(&header);
    }
}
