//! Exhaustive enumeration of every message variant exchanged between peers.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::sync::messages::{
    BlockResponse, GetBlock, GetHeaders, Headers, SyncMessage, SyncRequest, SyncResponse,
    Transactions,
};

/// All message variants exchanged between peers.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`SyncMessage`].
    SyncMessage(SyncMessage),
}

impl From<GetHeaders> for Message {
    fn from(value: GetHeaders) -> Self {
        Message::SyncMessage(SyncMessage::SyncRequest(SyncRequest::GetHeaders(value)))
    }
}

impl From<GetBlock> for Message {
    fn from(value: GetBlock) -> Self {
        Message::SyncMessage(SyncMessage::SyncRequest(SyncRequest::GetBlock(value)))
    }
}

impl From<Headers> for Message {
    fn from(value: Headers) -> Self {
        Message::SyncMessage(SyncMessage::SyncResponse(SyncResponse::Headers(value)))
    }
}

impl From<BlockResponse> for Message {
    fn from(value: BlockResponse) -> Self {
        Message::SyncMessage(SyncMessage::SyncResponse(SyncResponse::BlockResponse(
            value,
        )))
    }
}

impl From<Transactions> for Message {
    fn from(value: Transactions) -> Self {
        Message::SyncMessage(SyncMessage::SyncResponse(SyncResponse::Transactions(value)))
    }
}
