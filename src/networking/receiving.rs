//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use ed25519_dalek::VerifyingKey;

use crate::sync::messages::{SyncMessage, SyncRequest, SyncResponse};

use super::{messages::Message, network::Network};

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into
/// receiver handles.
///
/// The kinds of messages the poller distributes are:
/// 1. Sync requests (processed by the [`SyncServer`][crate::sync::server::SyncServer]), and
/// 2. Sync responses (processed by the replication thread's
///    [`SyncEngine`][crate::sync::engine::SyncEngine]).
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(VerifyingKey, SyncRequest)>,
    Receiver<(VerifyingKey, SyncResponse)>,
) {
    let (to_sync_request_receiver, sync_request_receiver) = mpsc::channel();
    let (to_sync_response_receiver, sync_response_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::SyncMessage(s_msg) => match s_msg {
                    SyncMessage::SyncRequest(s_req) => {
                        let _ = to_sync_request_receiver.send((origin, s_req));
                    }
                    SyncMessage::SyncResponse(s_res) => {
                        let _ = to_sync_response_receiver.send((origin, s_res));
                    }
                },
            }
        } else {
            thread::yield_now()
        }
    });
    (
        poller_thread,
        sync_request_receiver,
        sync_response_receiver,
    )
}
