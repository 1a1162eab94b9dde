use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) insert_header_handlers: Vec<HandlerPtr<InsertHeaderEvent>>,
    pub(crate) verify_block_handlers: Vec<HandlerPtr<VerifyBlockEvent>>,
    pub(crate) invalidate_block_handlers: Vec<HandlerPtr<InvalidateBlockEvent>>,
    pub(crate) advance_tip_handlers: Vec<HandlerPtr<AdvanceTipEvent>>,
    pub(crate) side_branch_handlers: Vec<HandlerPtr<SideBranchEvent>>,
    pub(crate) create_snapshot_handlers: Vec<HandlerPtr<CreateSnapshotEvent>>,
    pub(crate) recycle_snapshot_handlers: Vec<HandlerPtr<RecycleSnapshotEvent>>,
    pub(crate) add_mined_block_handlers: Vec<HandlerPtr<AddMinedBlockEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) peer_synced_handlers: Vec<HandlerPtr<PeerSyncedEvent>>,
    pub(crate) sync_quorum_handlers: Vec<HandlerPtr<SyncQuorumEvent>>,
    pub(crate) request_headers_handlers: Vec<HandlerPtr<RequestHeadersEvent>>,
    pub(crate) receive_headers_handlers: Vec<HandlerPtr<ReceiveHeadersEvent>>,
    pub(crate) request_block_handlers: Vec<HandlerPtr<RequestBlockEvent>>,
    pub(crate) receive_block_handlers: Vec<HandlerPtr<ReceiveBlockEvent>>,
    pub(crate) receive_transactions_handlers: Vec<HandlerPtr<ReceiveTransactionsEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) send_sync_response_handlers: Vec<HandlerPtr<SendSyncResponseEvent>>,
    pub(crate) ban_peer_handlers: Vec<HandlerPtr<BanPeerEvent>>,
    pub(crate) ban_address_handlers: Vec<HandlerPtr<BanAddressEvent>>,
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        on_insert_header: Option<HandlerPtr<InsertHeaderEvent>>,
        on_verify_block: Option<HandlerPtr<VerifyBlockEvent>>,
        on_invalidate_block: Option<HandlerPtr<InvalidateBlockEvent>>,
        on_advance_tip: Option<HandlerPtr<AdvanceTipEvent>>,
        on_side_branch: Option<HandlerPtr<SideBranchEvent>>,
        on_create_snapshot: Option<HandlerPtr<CreateSnapshotEvent>>,
        on_recycle_snapshot: Option<HandlerPtr<RecycleSnapshotEvent>>,
        on_add_mined_block: Option<HandlerPtr<AddMinedBlockEvent>>,
        on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
        on_peer_synced: Option<HandlerPtr<PeerSyncedEvent>>,
        on_sync_quorum: Option<HandlerPtr<SyncQuorumEvent>>,
        on_request_headers: Option<HandlerPtr<RequestHeadersEvent>>,
        on_receive_headers: Option<HandlerPtr<ReceiveHeadersEvent>>,
        on_request_block: Option<HandlerPtr<RequestBlockEvent>>,
        on_receive_block: Option<HandlerPtr<ReceiveBlockEvent>>,
        on_receive_transactions: Option<HandlerPtr<ReceiveTransactionsEvent>>,
        on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
        on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
        on_ban_peer: Option<HandlerPtr<BanPeerEvent>>,
        on_ban_address: Option<HandlerPtr<BanAddressEvent>>,
    ) -> Self {
        fn collect<T: Logger>(log_events: bool, user: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            if let Some(user) = user {
                handlers.push(user);
            }
            handlers
        }

        Self {
            insert_header_handlers: collect(log_events, on_insert_header),
            verify_block_handlers: collect(log_events, on_verify_block),
            invalidate_block_handlers: collect(log_events, on_invalidate_block),
            advance_tip_handlers: collect(log_events, on_advance_tip),
            side_branch_handlers: collect(log_events, on_side_branch),
            create_snapshot_handlers: collect(log_events, on_create_snapshot),
            recycle_snapshot_handlers: collect(log_events, on_recycle_snapshot),
            add_mined_block_handlers: collect(log_events, on_add_mined_block),
            start_sync_handlers: collect(log_events, on_start_sync),
            peer_synced_handlers: collect(log_events, on_peer_synced),
            sync_quorum_handlers: collect(log_events, on_sync_quorum),
            request_headers_handlers: collect(log_events, on_request_headers),
            receive_headers_handlers: collect(log_events, on_receive_headers),
            request_block_handlers: collect(log_events, on_request_block),
            receive_block_handlers: collect(log_events, on_receive_block),
            receive_transactions_handlers: collect(log_events, on_receive_transactions),
            receive_sync_request_handlers: collect(log_events, on_receive_sync_request),
            send_sync_response_handlers: collect(log_events, on_send_sync_response),
            ban_peer_handlers: collect(log_events, on_ban_peer),
            ban_address_handlers: collect(log_events, on_ban_address),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_header_handlers.is_empty()
            && self.verify_block_handlers.is_empty()
            && self.invalidate_block_handlers.is_empty()
            && self.advance_tip_handlers.is_empty()
            && self.side_branch_handlers.is_empty()
            && self.create_snapshot_handlers.is_empty()
            && self.recycle_snapshot_handlers.is_empty()
            && self.add_mined_block_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.peer_synced_handlers.is_empty()
            && self.sync_quorum_handlers.is_empty()
            && self.request_headers_handlers.is_empty()
            && self.receive_headers_handlers.is_empty()
            && self.request_block_handlers.is_empty()
            && self.receive_block_handlers.is_empty()
            && self.receive_transactions_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
            && self.ban_peer_handlers.is_empty()
            && self.ban_address_handlers.is_empty()
    }

    pub fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertHeader(event) => self
                .insert_header_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::VerifyBlock(event) => self
                .verify_block_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::InvalidateBlock(event) => self
                .invalidate_block_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::AdvanceTip(event) => self
                .advance_tip_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::SideBranch(event) => self
                .side_branch_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::CreateSnapshot(event) => self
                .create_snapshot_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::RecycleSnapshot(event) => self
                .recycle_snapshot_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::AddMinedBlock(event) => self
                .add_mined_block_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::StartSync(event) => self
                .start_sync_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::PeerSynced(event) => self
                .peer_synced_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::SyncQuorum(event) => self
                .sync_quorum_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::RequestHeaders(event) => self
                .request_headers_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::ReceiveHeaders(event) => self
                .receive_headers_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::RequestBlock(event) => self
                .request_block_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::ReceiveBlock(event) => self
                .receive_block_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::ReceiveTransactions(event) => self
                .receive_transactions_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::ReceiveSyncRequest(event) => self
                .receive_sync_request_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::SendSyncResponse(event) => self
                .send_sync_response_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::BanPeer(event) => self
                .ban_peer_handlers
                .iter()
                .for_each(|handler| handler(&event)),

            Event::BanAddress(event) => self
                .ban_address_handlers
                .iter()
                .for_each(|handler| handler(&event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => return,
        }
    })
}
