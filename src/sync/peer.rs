//! Per-peer protocol state: request windows, outstanding and lapsed requests, sync progress, and
//! ban bookkeeping.

use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::sync::messages::GetHeaders;
use crate::types::data_types::{BlockHeight, CryptoHash};

/// How long lapsed-request records are kept. A reply arriving later than this is no longer
/// distinguishable from an unsolicited one.
pub(crate) const LAPSE_RETENTION: Duration = Duration::from_secs(5 * 60);

/// How long a peer (or address) is excluded after a protocol offense.
///
/// Graduated levels penalize resource faults; `Forever` is reserved for outright protocol
/// violations, which no honest implementation produces.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BanLevel {
    Minute,
    Hour,
    Day,
    Month,
    Forever,
}

impl BanLevel {
    /// The exclusion period, or `None` for a permanent ban.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            BanLevel::Minute => Some(Duration::from_secs(60)),
            BanLevel::Hour => Some(Duration::from_secs(60 * 60)),
            BanLevel::Day => Some(Duration::from_secs(24 * 60 * 60)),
            BanLevel::Month => Some(Duration::from_secs(30 * 24 * 60 * 60)),
            BanLevel::Forever => None,
        }
    }
}

impl Display for BanLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BanLevel::Minute => "minute",
            BanLevel::Hour => "hour",
            BanLevel::Day => "day",
            BanLevel::Month => "month",
            BanLevel::Forever => "forever",
        };
        write!(f, "{}", name)
    }
}

/// Whether a peer is still streaming headers to us or has reported its end-of-chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PeerSyncState {
    Syncing,
    Synced,
}

/// Everything the engine tracks about one connected peer.
pub(crate) struct PeerContext {
    /// How many block requests may be in flight to this peer at once. Grows by 1 per good block
    /// up to three times the initial window; halves on every lapsed request.
    pub(crate) window: u32,

    /// The header request awaiting a reply, if any. At most one per peer.
    pub(crate) header_request: Option<OutstandingRequest>,

    /// Header requests that timed out, with their lapse time. A late reply echoing one of these
    /// is dropped without penalty. Entries older than [`LAPSE_RETENTION`] are purged.
    pub(crate) lapsed_header_requests: Vec<(GetHeaders, Instant)>,

    /// In-flight block requests by hash, with the send time.
    pub(crate) inflight_blocks: HashMap<CryptoHash, Instant>,

    /// Block requests that timed out, with their lapse time. A late body for one of these is
    /// dropped without penalty. Entries older than [`LAPSE_RETENTION`] are purged.
    pub(crate) lapsed_blocks: HashMap<CryptoHash, Instant>,

    /// The height to anchor the next header request at.
    pub(crate) anchor: BlockHeight,

    /// The highest header height this peer has shown us. Used to skip peers that already have a
    /// range when announcing.
    pub(crate) best_height: BlockHeight,

    pub(crate) sync_state: PeerSyncState,
}

/// A sent [`GetHeaders`] together with its send time.
pub(crate) struct OutstandingRequest {
    pub(crate) request: GetHeaders,
    pub(crate) since: Instant,
}

impl PeerContext {
    pub(crate) fn new(initial_window: u32, anchor: BlockHeight) -> PeerContext {
        PeerContext {
            window: initial_window,
            header_request: None,
            lapsed_header_requests: Vec::new(),
            inflight_blocks: HashMap::new(),
            lapsed_blocks: HashMap::new(),
            anchor,
            best_height: BlockHeight::new(0),
            sync_state: PeerSyncState::Syncing,
        }
    }

    /// Whether another block request fits in this peer's window.
    pub(crate) fn has_window_room(&self) -> bool {
        (self.inflight_blocks.len() as u32) < self.window
    }
}
