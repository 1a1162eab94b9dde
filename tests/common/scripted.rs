//! A hand-driven peer for replication tests: it owns a [`NetworkStub`] and answers sync
//! requests out of a prepared chain whenever it is pumped.

use borsh::BorshSerialize;
use chainrep::networking::{messages::Message, network::Network};
use chainrep::sync::messages::{
    BlockResponse, GetBlock, GetHeaders, Headers, SyncMessage, SyncRequest, SyncResponse,
};
use chainrep::types::{block::Block, header::Header};
use ed25519_dalek::VerifyingKey;

use crate::common::network::NetworkStub;

/// Serves headers from `canonical` by height and block bodies from `canonical` plus `extra` by
/// hash. Does nothing until [`pump`](ScriptedPeer::pump) is called, which makes every test
/// scenario a deterministic request-reply script.
pub(crate) struct ScriptedPeer {
    pub(crate) network: NetworkStub,
    /// The chain this peer advertises, indexed by height. Element 0 is genesis, which is never
    /// served.
    pub(crate) canonical: Vec<Block>,
    /// Side-branch blocks, served by hash only.
    pub(crate) extra: Vec<Block>,
    /// When false, block requests go unanswered while header requests are still served.
    pub(crate) serve_blocks: bool,
    /// Tip announcements this peer has received.
    pub(crate) announcements: Vec<Headers>,
}

impl ScriptedPeer {
    pub(crate) fn new(network: NetworkStub, canonical: Vec<Block>) -> ScriptedPeer {
        ScriptedPeer {
            network,
            canonical,
            extra: Vec::new(),
            serve_blocks: true,
            announcements: Vec::new(),
        }
    }

    /// Drain the inbox, answering every request in it.
    pub(crate) fn pump(&mut self) {
        while let Some((origin, message)) = self.network.recv() {
            let Message::SyncMessage(sync_message) = message;
            match sync_message {
                SyncMessage::SyncRequest(SyncRequest::GetHeaders(request)) => {
                    self.serve_headers(origin, request)
                }
                SyncMessage::SyncRequest(SyncRequest::GetBlock(request)) => {
                    self.serve_block(origin, request)
                }
                SyncMessage::SyncResponse(SyncResponse::Headers(headers)) => {
                    if headers.request.is_none() {
                        self.announcements.push(headers);
                    }
                }
                SyncMessage::SyncResponse(_) => (),
            }
        }
    }

    fn serve_headers(&mut self, origin: VerifyingKey, request: GetHeaders) {
        let from = request.from.int().max(1) as usize;
        let until = from
            .saturating_add(request.limit as usize)
            .min(self.canonical.len());
        let headers: Vec<Header> = if from < self.canonical.len() {
            self.canonical[from..until]
                .iter()
                .map(|block| block.header.clone())
                .collect()
        } else {
            Vec::new()
        };
        self.network
            .send(origin, Headers::reply(request, headers).into());
    }

    fn serve_block(&mut self, origin: VerifyingKey, request: GetBlock) {
        if !self.serve_blocks {
            return;
        }
        let found = self
            .canonical
            .iter()
            .chain(self.extra.iter())
            .find(|block| block.hash() == request.hash);
        if let Some(block) = found {
            let response = BlockResponse {
                hash: request.hash,
                block_bytes: block.try_to_vec().unwrap(),
                redo_bytes: None,
            };
            self.network.send(origin, response.into());
        }
    }
}
