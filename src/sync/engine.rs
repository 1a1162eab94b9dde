//! The client side of the sync protocol: windowed block fetching, header request echo matching,
//! peer banning, and outbound connection upkeep.
//!
//! The engine owns all per-peer protocol state and is driven from the replication thread. It
//! never interprets header or block contents; it only enforces the transport-level rules (echo
//! matching, request windows, count checks) and hands accepted payloads to the caller.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant, SystemTime};

use ed25519_dalek::VerifyingKey;

use crate::events::{
    BanAddressEvent, BanPeerEvent, Event, ReceiveBlockEvent, ReceiveHeadersEvent,
    ReceiveTransactionsEvent, RequestBlockEvent, RequestHeadersEvent, StartSyncEvent,
};
use crate::networking::{network::Network, sending::SenderHandle};
use crate::sync::messages::{BlockResponse, GetBlock, GetHeaders, Headers, Transactions};
use crate::sync::peer::{BanLevel, OutstandingRequest, PeerContext, PeerSyncState, LAPSE_RETENTION};
use crate::types::data_types::{BlockHeight, ChainID, CryptoHash};
use crate::types::header::Header;

/// Configuration for the [`SyncEngine`].
#[derive(Clone)]
pub(crate) struct SyncEngineConfiguration {
    pub(crate) chain_id: ChainID,

    /// Starting number of concurrent block requests per peer. The window grows by 1 per good
    /// block up to three times this value.
    pub(crate) initial_window: u32,

    /// `limit` used for header requests the engine originates.
    pub(crate) header_request_limit: u32,

    pub(crate) block_request_timeout: Duration,

    pub(crate) header_request_timeout: Duration,

    /// How many outbound connections to keep topped up.
    pub(crate) min_outbound: usize,
}

pub(crate) struct SyncEngine<N: Network> {
    config: SyncEngineConfiguration,
    network: N,
    sender: SenderHandle<N>,
    peers: HashMap<VerifyingKey, PeerContext>,
    /// Ban expiry per peer; `None` means forever.
    banned_peers: HashMap<VerifyingKey, Option<Instant>>,
    banned_addresses: HashMap<SocketAddr, Instant>,
    /// Which peers are known to hold each still-wanted block.
    holders: HashMap<CryptoHash, HashSet<VerifyingKey>>,
    /// Wanted blocks waiting for window room at some holder.
    pending: VecDeque<CryptoHash>,
    event_publisher: Option<Sender<Event>>,
}

/// What the engine decided about an incoming `Headers` message.
pub(crate) enum HeadersVerdict {
    /// The message passed the transport-level rules; the caller validates its contents.
    Accepted(Headers),

    /// A late reply to a lapsed request, or a message from an unregistered peer. Dropped
    /// without penalty.
    Ignored,

    /// The message violated the protocol; the origin has been banned.
    Rejected,
}

/// What the engine decided about an incoming `BlockResponse`.
pub(crate) enum BlockVerdict {
    Accepted(BlockResponse),
    Ignored,
    Rejected,
}

enum EchoCheck {
    Broadcast,
    Matched,
    Lapsed,
    Violation,
}

impl<N: Network> SyncEngine<N> {
    pub(crate) fn new(
        config: SyncEngineConfiguration,
        network: N,
        event_publisher: Option<Sender<Event>>,
    ) -> SyncEngine<N> {
        SyncEngine {
            config,
            sender: SenderHandle::new(network.clone()),
            network,
            peers: HashMap::new(),
            banned_peers: HashMap::new(),
            banned_addresses: HashMap::new(),
            holders: HashMap::new(),
            pending: VecDeque::new(),
            event_publisher,
        }
    }

    /// Reconcile the peer table with the transport's current connections, outbound and inbound
    /// alike. New peers get a fresh context anchored at `anchor`; contexts of gone peers are
    /// dropped and their in-flight blocks reassigned. Returns the newly-registered peers, which
    /// the caller should start header sync with.
    pub(crate) fn refresh_peers(&mut self, anchor: BlockHeight) -> Vec<VerifyingKey> {
        let connected: HashSet<VerifyingKey> = self
            .network
            .outbound_peers()
            .into_iter()
            .chain(self.network.inbound_peers())
            .collect();

        let gone: Vec<VerifyingKey> = self
            .peers
            .keys()
            .filter(|peer| !connected.contains(peer))
            .copied()
            .collect();
        for peer in gone {
            if let Some(context) = self.peers.remove(&peer) {
                self.requeue_inflight(&peer, context);
            }
        }

        let mut new_peers = Vec::new();
        for peer in connected {
            if self.banned_peers.contains_key(&peer) {
                // A banned peer reconnected before its ban expired.
                self.network.disconnect(&peer);
                continue;
            }
            if !self.peers.contains_key(&peer) {
                self.peers
                    .insert(peer, PeerContext::new(self.config.initial_window, anchor));
                Event::publish(
                    &self.event_publisher,
                    Event::StartSync(StartSyncEvent {
                        timestamp: SystemTime::now(),
                        peer,
                        from: anchor,
                    }),
                );
                new_peers.push(peer);
            }
        }
        self.fill_windows();
        new_peers
    }

    /// Send a `GetHeaders` to `peer` starting at height `from`. At most one header request may
    /// be outstanding per peer.
    pub(crate) fn request_headers(
        &mut self,
        peer: VerifyingKey,
        from: BlockHeight,
        limit: u32,
    ) -> Result<(), SyncError> {
        let chain_id = self.config.chain_id;
        let context = self.peers.get_mut(&peer).ok_or(SyncError::UnknownPeer)?;
        if context.header_request.is_some() {
            return Err(SyncError::AlreadyInFlight);
        }
        let request = GetHeaders {
            chain_id,
            from,
            limit,
        };
        context.header_request = Some(OutstandingRequest {
            request: request.clone(),
            since: Instant::now(),
        });
        context.anchor = from;
        self.sender.send(peer, request);
        Event::publish(
            &self.event_publisher,
            Event::RequestHeaders(RequestHeadersEvent {
                timestamp: SystemTime::now(),
                peer,
                from,
                limit,
            }),
        );
        Ok(())
    }

    /// Like [`request_headers`](Self::request_headers), with the engine's configured limit.
    pub(crate) fn request_headers_default(
        &mut self,
        peer: VerifyingKey,
        from: BlockHeight,
    ) -> Result<(), SyncError> {
        let limit = self.config.header_request_limit;
        self.request_headers(peer, from, limit)
    }

    /// Record `holder` as having the blocks in `hashes` and request each one, subject to the
    /// holder's window. Blocks that do not fit wait in the pending queue until
    /// [`fill_windows`](Self::fill_windows) finds a holder with room.
    pub(crate) fn request_blocks(&mut self, hashes: Vec<CryptoHash>, holder: VerifyingKey) {
        for hash in hashes {
            self.holders.entry(hash).or_default().insert(holder);
            if self.is_tracked(&hash) {
                continue;
            }
            let has_room = self
                .peers
                .get(&holder)
                .map(|context| context.has_window_room())
                .unwrap_or(false);
            if has_room {
                self.send_block_request(holder, hash);
            } else {
                self.pending.push_back(hash);
            }
        }
    }

    /// Drain the pending queue into any known holder with window room.
    pub(crate) fn fill_windows(&mut self) {
        for _ in 0..self.pending.len() {
            let hash = match self.pending.pop_front() {
                Some(hash) => hash,
                None => break,
            };
            match self.pick_holder(&hash) {
                Some(holder) => self.send_block_request(holder, hash),
                None => self.pending.push_back(hash),
            }
        }
    }

    /// Apply the transport-level rules to an incoming `Headers` message: the count must match
    /// the payload, and a reply's echoed request must match this peer's outstanding request
    /// verbatim. Announcements (no echo) skip the echo check.
    pub(crate) fn on_headers(&mut self, peer: VerifyingKey, msg: Headers) -> HeadersVerdict {
        if !self.peers.contains_key(&peer) {
            return HeadersVerdict::Ignored;
        }
        if msg.count as usize != msg.headers.len() {
            self.ban(peer, BanLevel::Forever);
            return HeadersVerdict::Rejected;
        }

        let echo_check = match &msg.request {
            None => EchoCheck::Broadcast,
            Some(echo) => match self.peers.get_mut(&peer) {
                None => return HeadersVerdict::Ignored,
                Some(context) => {
                    let matches_outstanding = context
                        .header_request
                        .as_ref()
                        .map(|outstanding| &outstanding.request == echo)
                        .unwrap_or(false);
                    if matches_outstanding {
                        context.header_request = None;
                        EchoCheck::Matched
                    } else if let Some(position) = context
                        .lapsed_header_requests
                        .iter()
                        .position(|(lapsed, _)| lapsed == echo)
                    {
                        context.lapsed_header_requests.remove(position);
                        EchoCheck::Lapsed
                    } else {
                        EchoCheck::Violation
                    }
                }
            },
        };
        match echo_check {
            EchoCheck::Violation => {
                self.ban(peer, BanLevel::Forever);
                return HeadersVerdict::Rejected;
            }
            EchoCheck::Lapsed => return HeadersVerdict::Ignored,
            EchoCheck::Matched | EchoCheck::Broadcast => (),
        }

        if let (Some(context), Some(last)) = (self.peers.get_mut(&peer), msg.headers.last()) {
            if last.height > context.best_height {
                context.best_height = last.height;
            }
        }
        Event::publish(
            &self.event_publisher,
            Event::ReceiveHeaders(ReceiveHeadersEvent {
                timestamp: SystemTime::now(),
                peer,
                count: msg.count,
            }),
        );
        HeadersVerdict::Accepted(msg)
    }

    /// Apply the transport-level rules to an incoming `BlockResponse`: the hash must have been
    /// requested from this exact peer. A body for a lapsed request is dropped without penalty,
    /// and so is a body from an unregistered peer, whose lapse bookkeeping was lost on
    /// disconnect; an unsolicited body from a registered peer is a protocol violation.
    pub(crate) fn on_block(&mut self, peer: VerifyingKey, msg: BlockResponse) -> BlockVerdict {
        if !self.peers.contains_key(&peer) {
            return BlockVerdict::Ignored;
        }

        let window_cap = self.config.initial_window * 3;
        let delivery = match self.peers.get_mut(&peer) {
            None => return BlockVerdict::Ignored,
            Some(context) => {
                if context.inflight_blocks.remove(&msg.hash).is_some() {
                    context.window = (context.window + 1).min(window_cap);
                    Delivery::Requested
                } else if context.lapsed_blocks.remove(&msg.hash).is_some() {
                    Delivery::Lapsed
                } else {
                    Delivery::Unsolicited
                }
            }
        };

        match delivery {
            Delivery::Requested => {
                self.holders.remove(&msg.hash);
                Event::publish(
                    &self.event_publisher,
                    Event::ReceiveBlock(ReceiveBlockEvent {
                        timestamp: SystemTime::now(),
                        peer,
                        block: msg.hash,
                    }),
                );
                self.fill_windows();
                BlockVerdict::Accepted(msg)
            }
            Delivery::Lapsed => BlockVerdict::Ignored,
            Delivery::Unsolicited => {
                self.ban(peer, BanLevel::Forever);
                BlockVerdict::Rejected
            }
        }
    }

    /// Count-check an incoming `Transactions` batch. A mismatched count is a protocol
    /// violation; a good batch is surfaced through the event bus for an external mempool.
    pub(crate) fn on_transactions(
        &mut self,
        peer: VerifyingKey,
        msg: Transactions,
    ) -> Option<Transactions> {
        if msg.count as usize != msg.transactions.len() {
            self.ban(peer, BanLevel::Forever);
            return None;
        }
        Event::publish(
            &self.event_publisher,
            Event::ReceiveTransactions(ReceiveTransactionsEvent {
                timestamp: SystemTime::now(),
                peer,
                count: msg.count,
            }),
        );
        Some(msg)
    }

    /// Exclude `peer` for `level`: disconnect it, drop its context, and reassign its in-flight
    /// blocks to other holders or the pending queue.
    pub(crate) fn ban(&mut self, peer: VerifyingKey, level: BanLevel) {
        self.network.disconnect(&peer);
        let expiry = level.duration().map(|duration| Instant::now() + duration);
        self.banned_peers.insert(peer, expiry);
        if let Some(context) = self.peers.remove(&peer) {
            self.requeue_inflight(&peer, context);
        }
        Event::publish(
            &self.event_publisher,
            Event::BanPeer(BanPeerEvent {
                timestamp: SystemTime::now(),
                peer,
                level,
            }),
        );
        self.fill_windows();
    }

    /// Lapse requests that have outlived their timeouts. Every lapse halves the offending
    /// peer's window; a lapse that leaves the window at zero costs an `Hour` ban.
    pub(crate) fn expire_stale(&mut self, now: Instant) {
        let header_timeout = self.config.header_request_timeout;
        let block_timeout = self.config.block_request_timeout;
        let peers: Vec<VerifyingKey> = self.peers.keys().copied().collect();
        for peer in peers {
            let mut lapses = 0u32;
            let mut lapsed_hashes = Vec::new();
            let mut exhausted = false;
            if let Some(context) = self.peers.get_mut(&peer) {
                let header_lapsed = context
                    .header_request
                    .as_ref()
                    .map(|outstanding| now.duration_since(outstanding.since) >= header_timeout)
                    .unwrap_or(false);
                if header_lapsed {
                    if let Some(outstanding) = context.header_request.take() {
                        context.lapsed_header_requests.push((outstanding.request, now));
                    }
                    lapses += 1;
                }

                lapsed_hashes = context
                    .inflight_blocks
                    .iter()
                    .filter(|(_, since)| now.duration_since(**since) >= block_timeout)
                    .map(|(hash, _)| *hash)
                    .collect();
                for hash in &lapsed_hashes {
                    context.inflight_blocks.remove(hash);
                    context.lapsed_blocks.insert(*hash, now);
                    lapses += 1;
                }

                for _ in 0..lapses {
                    context.window /= 2;
                }
                exhausted = lapses > 0 && context.window == 0;

                // Replies later than the retention period are indistinguishable from
                // unsolicited ones anyway, so the records need not be kept forever.
                context
                    .lapsed_header_requests
                    .retain(|(_, lapsed_at)| now.duration_since(*lapsed_at) < LAPSE_RETENTION);
                context
                    .lapsed_blocks
                    .retain(|_, lapsed_at| now.duration_since(*lapsed_at) < LAPSE_RETENTION);
            }

            // A lapsed block must be fetched from someone else.
            for hash in lapsed_hashes {
                if let Some(holders) = self.holders.get_mut(&hash) {
                    holders.remove(&peer);
                }
                self.pending.push_back(hash);
            }

            if exhausted {
                self.ban(peer, BanLevel::Hour);
            }
        }
        self.fill_windows();
    }

    /// Top outbound connections up to the configured minimum from the transport's address book,
    /// skipping banned, connected, and in-progress addresses. A connect attempt the transport
    /// refuses to start costs the address a `Minute` ban. Also retires expired bans.
    pub(crate) fn maintain_outbound(&mut self, now: Instant) {
        self.banned_peers.retain(|_, expiry| match expiry {
            Some(expiry) => *expiry > now,
            None => true,
        });
        self.banned_addresses.retain(|_, expiry| *expiry > now);

        let connecting = self.network.connecting();
        let mut have = self.network.outbound_peers().len() + connecting.len();
        if have >= self.config.min_outbound {
            return;
        }
        for address in self.network.known_addresses() {
            if have >= self.config.min_outbound {
                break;
            }
            if self.banned_addresses.contains_key(&address)
                || self.network.is_connected(&address)
                || connecting.contains(&address)
            {
                continue;
            }
            if self.network.connect(address) {
                have += 1;
            } else {
                self.ban_address(address, now);
            }
        }
    }

    /// Send an unsolicited `Headers` announcement to every peer whose best known height is
    /// below the top of `headers`.
    pub(crate) fn announce_headers(&mut self, headers: &[Header]) {
        let top = match headers.last() {
            Some(header) => header.height,
            None => return,
        };
        let behind: Vec<VerifyingKey> = self
            .peers
            .iter()
            .filter(|(_, context)| context.best_height < top)
            .map(|(peer, _)| *peer)
            .collect();
        if behind.is_empty() {
            return;
        }
        let msg = Headers::announcement(headers.to_vec());
        for peer in behind {
            self.sender.send(peer, msg.clone());
        }
    }

    /// Mark `peer` as synced. Returns `true` if it was still syncing.
    pub(crate) fn mark_synced(&mut self, peer: &VerifyingKey) -> bool {
        match self.peers.get_mut(peer) {
            Some(context) if context.sync_state == PeerSyncState::Syncing => {
                context.sync_state = PeerSyncState::Synced;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn synced_count(&self) -> usize {
        self.peers
            .values()
            .filter(|context| context.sync_state == PeerSyncState::Synced)
            .count()
    }

    pub(crate) fn anchor(&self, peer: &VerifyingKey) -> Option<BlockHeight> {
        self.peers.get(peer).map(|context| context.anchor)
    }

    pub(crate) fn is_registered(&self, peer: &VerifyingKey) -> bool {
        self.peers.contains_key(peer)
    }

    fn is_tracked(&self, hash: &CryptoHash) -> bool {
        self.pending.contains(hash)
            || self
                .peers
                .values()
                .any(|context| context.inflight_blocks.contains_key(hash))
    }

    fn pick_holder(&self, hash: &CryptoHash) -> Option<VerifyingKey> {
        let holders = self.holders.get(hash)?;
        holders
            .iter()
            .find(|holder| {
                self.peers
                    .get(holder)
                    .map(|context| context.has_window_room())
                    .unwrap_or(false)
            })
            .copied()
    }

    fn send_block_request(&mut self, peer: VerifyingKey, hash: CryptoHash) {
        let chain_id = self.config.chain_id;
        if let Some(context) = self.peers.get_mut(&peer) {
            context.inflight_blocks.insert(hash, Instant::now());
            self.sender.send(
                peer,
                GetBlock {
                    chain_id,
                    hash,
                    want_redo: false,
                },
            );
            Event::publish(
                &self.event_publisher,
                Event::RequestBlock(RequestBlockEvent {
                    timestamp: SystemTime::now(),
                    peer,
                    block: hash,
                }),
            );
        }
    }

    fn requeue_inflight(&mut self, peer: &VerifyingKey, context: PeerContext) {
        for hash in context.inflight_blocks.into_keys() {
            if let Some(holders) = self.holders.get_mut(&hash) {
                holders.remove(peer);
            }
            self.pending.push_back(hash);
        }
    }

    fn ban_address(&mut self, address: SocketAddr, now: Instant) {
        if let Some(duration) = BanLevel::Minute.duration() {
            self.banned_addresses.insert(address, now + duration);
        }
        Event::publish(
            &self.event_publisher,
            Event::BanAddress(BanAddressEvent {
                timestamp: SystemTime::now(),
                address,
            }),
        );
    }
}

enum Delivery {
    Requested,
    Lapsed,
    Unsolicited,
}

/// Error when originating a sync request.
#[derive(Debug, PartialEq, Eq)]
pub enum SyncError {
    /// A header request to this peer is already outstanding.
    AlreadyInFlight,

    /// The peer is not registered with the engine (never connected, or banned).
    UnknownPeer,
}

impl Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::AlreadyInFlight => {
                write!(f, "a header request to this peer is already in flight")
            }
            SyncError::UnknownPeer => write!(f, "peer is not registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;
    use crate::networking::messages::Message;

    /// A transport with a fixed set of connected peers that swallows everything sent to it.
    #[derive(Clone)]
    struct StaticNetwork {
        peers: Vec<VerifyingKey>,
    }

    impl Network for StaticNetwork {
        fn connect(&mut self, _address: SocketAddr) -> bool {
            false
        }
        fn disconnect(&mut self, _peer: &VerifyingKey) {}
        fn broadcast(&mut self, _message: Message) {}
        fn send(&mut self, _peer: VerifyingKey, _message: Message) {}
        fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
            None
        }
        fn outbound_peers(&self) -> Vec<VerifyingKey> {
            self.peers.clone()
        }
        fn inbound_peers(&self) -> Vec<VerifyingKey> {
            Vec::new()
        }
        fn connecting(&self) -> Vec<SocketAddr> {
            Vec::new()
        }
        fn known_addresses(&self) -> Vec<SocketAddr> {
            Vec::new()
        }
        fn address_of(&self, _peer: &VerifyingKey) -> Option<SocketAddr> {
            None
        }
        fn is_connected(&self, _address: &SocketAddr) -> bool {
            false
        }
    }

    fn engine(initial_window: u32, peers: Vec<VerifyingKey>) -> SyncEngine<StaticNetwork> {
        let config = SyncEngineConfiguration {
            chain_id: ChainID::new(0),
            initial_window,
            header_request_limit: 5,
            block_request_timeout: Duration::from_millis(100),
            header_request_timeout: Duration::from_millis(100),
            min_outbound: 0,
        };
        SyncEngine::new(config, StaticNetwork { peers }, None)
    }

    fn random_peer() -> VerifyingKey {
        SigningKey::generate(&mut OsRng).verifying_key()
    }

    fn body(hash: CryptoHash) -> BlockResponse {
        BlockResponse {
            hash,
            block_bytes: Vec::new(),
            redo_bytes: None,
        }
    }

    #[test]
    fn bodies_from_unregistered_peers_are_dropped_without_a_ban() {
        let stranger = random_peer();
        let mut engine = engine(4, Vec::new());

        // A peer that disconnected loses its lapse bookkeeping, so a reply already in transit
        // must not look like a violation.
        let verdict = engine.on_block(stranger, body(CryptoHash::new([1; 32])));
        assert!(matches!(verdict, BlockVerdict::Ignored));
        assert!(engine.banned_peers.is_empty());
    }

    #[test]
    fn good_deliveries_grow_the_window_up_to_its_cap() {
        let peer = random_peer();
        let mut engine = engine(2, vec![peer]);
        engine.refresh_peers(BlockHeight::new(1));

        let hashes: Vec<CryptoHash> = (0u8..12).map(|i| CryptoHash::new([i; 32])).collect();
        engine.request_blocks(hashes, peer);

        let mut widest = 0;
        while let Some(hash) = engine.peers[&peer].inflight_blocks.keys().next().copied() {
            let verdict = engine.on_block(peer, body(hash));
            assert!(matches!(verdict, BlockVerdict::Accepted(_)));
            let window = engine.peers[&peer].window;
            assert!(window <= 6);
            widest = widest.max(window);
        }
        assert_eq!(widest, 6);
        assert!(engine.pending.is_empty());
    }

    #[test]
    fn a_banned_peers_undelivered_blocks_move_to_another_holder() {
        let (first, second) = (random_peer(), random_peer());
        let mut engine = engine(4, vec![first, second]);
        engine.refresh_peers(BlockHeight::new(1));

        let hash = CryptoHash::new([7; 32]);
        engine.request_blocks(vec![hash], first);
        engine.request_blocks(vec![hash], second);
        assert!(engine.peers[&first].inflight_blocks.contains_key(&hash));

        engine.ban(first, BanLevel::Hour);
        assert!(!engine.is_registered(&first));
        assert!(engine.peers[&second].inflight_blocks.contains_key(&hash));
        assert!(engine.pending.is_empty());
    }

    #[test]
    fn lapsed_request_records_are_purged_after_the_retention_period() {
        let peer = random_peer();
        let mut engine = engine(4, vec![peer]);
        engine.refresh_peers(BlockHeight::new(1));

        let hash = CryptoHash::new([9; 32]);
        engine.request_blocks(vec![hash], peer);
        engine
            .request_headers_default(peer, BlockHeight::new(1))
            .unwrap();

        let lapse = Instant::now() + Duration::from_secs(1);
        engine.expire_stale(lapse);
        assert!(engine.peers[&peer].lapsed_blocks.contains_key(&hash));
        assert_eq!(engine.peers[&peer].lapsed_header_requests.len(), 1);

        engine.expire_stale(lapse + LAPSE_RETENTION);
        assert!(engine.peers[&peer].lapsed_blocks.is_empty());
        assert!(engine.peers[&peer].lapsed_header_requests.is_empty());
    }
}
