//! Definitions for structured messages that are sent between peers as part of the sync protocol.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Transaction,
    data_types::{BlockHeight, ChainID, CryptoHash},
    header::Header,
};

#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum SyncMessage {
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
}

/// Messages served by the [`SyncServer`](crate::sync::server::SyncServer) thread.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum SyncRequest {
    GetHeaders(GetHeaders),
    GetBlock(GetBlock),
}

/// Messages processed by the replication thread's
/// [`SyncEngine`](crate::sync::engine::SyncEngine).
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum SyncResponse {
    Headers(Headers),
    BlockResponse(BlockResponse),
    Transactions(Transactions),
}

/// Ask a peer for a run of canonical-chain headers starting at height `from`.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct GetHeaders {
    pub chain_id: ChainID,
    pub from: BlockHeight,
    pub limit: u32,
}

/// A run of headers, sent either in reply to a [`GetHeaders`] (with `request` echoing it
/// verbatim) or unsolicited as a tip announcement (`request == None`).
///
/// `count` must equal `headers.len()`. A reply with `count == 0` means the responder has no
/// canonical headers at or above the requested height.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Headers {
    pub request: Option<GetHeaders>,
    pub error: Option<HeadersError>,
    pub count: u32,
    pub headers: Vec<Header>,
}

impl Headers {
    /// A reply to `request` carrying `headers`.
    pub fn reply(request: GetHeaders, headers: Vec<Header>) -> Headers {
        Headers {
            request: Some(request),
            error: None,
            count: headers.len() as u32,
            headers,
        }
    }

    /// A reply refusing `request`.
    pub fn refusal(request: GetHeaders, error: HeadersError) -> Headers {
        Headers {
            request: Some(request),
            error: Some(error),
            count: 0,
            headers: Vec::new(),
        }
    }

    /// An unsolicited tip announcement carrying `headers`.
    pub fn announcement(headers: Vec<Header>) -> Headers {
        Headers {
            request: None,
            error: None,
            count: headers.len() as u32,
            headers,
        }
    }
}

/// Why a [`GetHeaders`] could not be answered.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum HeadersError {
    /// The responder does not replicate the requested chain.
    UnknownChain,

    /// The responder hit a local storage fault while assembling the reply.
    Unavailable,
}

/// Ask a peer for the body of the block with hash `hash`, optionally together with its recorded
/// redo log.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct GetBlock {
    pub chain_id: ChainID,
    pub hash: CryptoHash,
    pub want_redo: bool,
}

/// The body of one block, identified by hash. `block_bytes` is the borsh encoding of the
/// [`Block`](crate::types::block::Block); it is relayed opaquely so the responder never
/// re-serializes.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct BlockResponse {
    pub hash: CryptoHash,
    pub block_bytes: Vec<u8>,
    pub redo_bytes: Option<Vec<u8>>,
}

/// An unsolicited batch of loose transactions for the receiver's mempool. `count` must equal
/// `transactions.len()`.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Transactions {
    pub count: u32,
    pub transactions: Vec<Transaction>,
}
