//! Definitions of engine events for event handling and logging.
//! Note: an event for a given action indicates that the action has been completed.

use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;

use crate::sync::peer::BanLevel;
use crate::types::{
    data_types::{BlockHeight, CryptoHash},
    header::Header,
};

pub enum Event {
    // Events that change persistent state.
    InsertHeader(InsertHeaderEvent),
    VerifyBlock(VerifyBlockEvent),
    InvalidateBlock(InvalidateBlockEvent),
    AdvanceTip(AdvanceTipEvent),
    SideBranch(SideBranchEvent),
    CreateSnapshot(CreateSnapshotEvent),
    RecycleSnapshot(RecycleSnapshotEvent),
    AddMinedBlock(AddMinedBlockEvent),
    // Sync progress events.
    StartSync(StartSyncEvent),
    PeerSynced(PeerSyncedEvent),
    SyncQuorum(SyncQuorumEvent),
    // Events that involve sending or receiving a sync message.
    RequestHeaders(RequestHeadersEvent),
    ReceiveHeaders(ReceiveHeadersEvent),
    RequestBlock(RequestBlockEvent),
    ReceiveBlock(ReceiveBlockEvent),
    ReceiveTransactions(ReceiveTransactionsEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
    // Peer management events.
    BanPeer(BanPeerEvent),
    BanAddress(BanAddressEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

pub struct InsertHeaderEvent {
    pub timestamp: SystemTime,
    pub header: Header,
}

pub struct VerifyBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

pub struct InvalidateBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

pub struct AdvanceTipEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

pub struct SideBranchEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

pub struct CreateSnapshotEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

pub struct RecycleSnapshotEvent {
    pub timestamp: SystemTime,
    pub deleted: usize,
}

pub struct AddMinedBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub from: BlockHeight,
}

pub struct PeerSyncedEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub height: BlockHeight,
}

pub struct SyncQuorumEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
}

pub struct RequestHeadersEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub from: BlockHeight,
    pub limit: u32,
}

pub struct ReceiveHeadersEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub count: u32,
}

pub struct RequestBlockEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub block: CryptoHash,
}

pub struct ReceiveBlockEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub block: CryptoHash,
}

pub struct ReceiveTransactionsEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub count: u32,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub from: BlockHeight,
    pub limit: u32,
}

pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub count: u32,
}

pub struct BanPeerEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub level: BanLevel,
}

pub struct BanAddressEvent {
    pub timestamp: SystemTime,
    pub address: SocketAddr,
}
