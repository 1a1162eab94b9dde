//! Implements the [`SyncServer`], the serving side of the sync protocol. It answers peers'
//! `GetHeaders` requests with runs of canonical-chain headers and their `GetBlock` requests with
//! stored block bytes (plus the recorded redo log, when asked for).
//!
//! The server is read-only: it observes the header store and snapshot directory that the
//! replication thread writes, and never mutates either.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    sync::Arc,
    thread::{self, JoinHandle},
    time::SystemTime,
};

use borsh::BorshSerialize;
use ed25519_dalek::VerifyingKey;
use log::error;

use crate::events::{Event, ReceiveSyncRequestEvent, SendSyncResponseEvent};
use crate::networking::{network::Network, sending::SenderHandle};
use crate::state::manager::StorageManager;
use crate::state::pluggables::{HeaderStore, LedgerStoreFactory, StoreError};
use crate::sync::messages::{
    BlockResponse, GetBlock, GetHeaders, Headers, HeadersError, SyncRequest,
};
use crate::types::{
    data_types::{BlockHeight, ChainID},
    header::Header,
};

pub(crate) struct SyncServerConfiguration {
    pub(crate) chain_id: ChainID,

    /// Upper bound on the number of headers returned per request, regardless of the requested
    /// `limit`.
    pub(crate) response_limit: u32,
}

pub(crate) struct SyncServer<N: Network + 'static, H: HeaderStore, F: LedgerStoreFactory> {
    config: SyncServerConfiguration,
    headers: H,
    manager: Arc<StorageManager<F, H>>,
    requests: Receiver<(VerifyingKey, SyncRequest)>,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, H: HeaderStore, F: LedgerStoreFactory> SyncServer<N, H, F> {
    pub(crate) fn new(
        config: SyncServerConfiguration,
        headers: H,
        manager: Arc<StorageManager<F, H>>,
        requests: Receiver<(VerifyingKey, SyncRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            headers,
            manager,
            requests,
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Sync server thread disconnected from main thread")
                }
            }

            match self.requests.try_recv() {
                Ok((origin, SyncRequest::GetHeaders(request))) => {
                    self.serve_headers(origin, request)
                }
                Ok((origin, SyncRequest::GetBlock(request))) => self.serve_block(origin, request),
                Err(TryRecvError::Empty) => thread::yield_now(),
                Err(TryRecvError::Disconnected) => return,
            }
        })
    }

    fn serve_headers(&mut self, origin: VerifyingKey, request: GetHeaders) {
        if request.chain_id != self.config.chain_id {
            self.sender
                .send(origin, Headers::refusal(request, HeadersError::UnknownChain));
            return;
        }

        Event::publish(
            &self.event_publisher,
            Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                from: request.from,
                limit: request.limit,
            }),
        );

        let limit = request.limit.min(self.config.response_limit);
        let reply = match self.canonical_run(&request, limit) {
            Ok(headers) => Headers::reply(request, headers),
            Err(err) => {
                error!("sync server could not assemble a header run: {}", err);
                Headers::refusal(request, HeadersError::Unavailable)
            }
        };
        let count = reply.count;
        self.sender.send(origin, reply);
        Event::publish(
            &self.event_publisher,
            Event::SendSyncResponse(SendSyncResponseEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                count,
            }),
        );
    }

    fn serve_block(&mut self, origin: VerifyingKey, request: GetBlock) {
        if request.chain_id != self.config.chain_id {
            return;
        }

        let block_bytes = match self.headers.block_bytes(&request.hash) {
            Ok(Some(bytes)) => bytes,
            // Blocks we do not have are not answered; the requester's timeout handles it.
            Ok(None) => return,
            Err(err) => {
                error!("sync server could not read block bytes: {}", err);
                return;
            }
        };

        let redo_bytes = if request.want_redo {
            match self.manager.redo_log(&request.hash) {
                Ok(Some(redo)) => match redo.try_to_vec() {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        error!("sync server could not encode a redo log: {}", err);
                        None
                    }
                },
                Ok(None) => None,
                Err(err) => {
                    error!("sync server could not read a redo log: {}", err);
                    None
                }
            }
        } else {
            None
        };

        self.sender.send(
            origin,
            BlockResponse {
                hash: request.hash,
                block_bytes,
                redo_bytes,
            },
        );
        Event::publish(
            &self.event_publisher,
            Event::SendSyncResponse(SendSyncResponseEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                count: 1,
            }),
        );
    }

    /// Collect up to `limit` canonical headers starting at `request.from`, oldest first. An
    /// empty run means the canonical chain ends below the requested height. The run never
    /// includes genesis: every replica already holds it, and offering it is a bannable fault.
    fn canonical_run(
        &self,
        request: &GetHeaders,
        limit: u32,
    ) -> Result<Vec<Header>, StoreError> {
        let mut run = Vec::new();
        let mut height = request.from.max(BlockHeight::new(1));
        while (run.len() as u32) < limit {
            let hash = match self.headers.canonical_at(height)? {
                Some(hash) => hash,
                None => break,
            };
            let stored = self
                .headers
                .header(&hash)?
                .ok_or_else(|| StoreError::Corrupt {
                    what: format!("canonical index points at missing header {}", hash),
                })?;
            run.push(stored.header);
            height = height + 1;
        }
        Ok(run)
    }
}
