//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [config](crate::node::Configuration).
//!
//! chainrep logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following
//! snippet is how a [VerifyBlock](crate::events::VerifyBlockEvent) is printed:
//!
//! ```text
//! VerifyBlock, 1701329264, fNGCJyk, 42
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block's hash.
//! - The fourth value is the block's height.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_HEADER: &str = "InsertHeader";
pub const VERIFY_BLOCK: &str = "VerifyBlock";
pub const INVALIDATE_BLOCK: &str = "InvalidateBlock";
pub const ADVANCE_TIP: &str = "AdvanceTip";
pub const SIDE_BRANCH: &str = "SideBranch";
pub const CREATE_SNAPSHOT: &str = "CreateSnapshot";
pub const RECYCLE_SNAPSHOT: &str = "RecycleSnapshot";
pub const ADD_MINED_BLOCK: &str = "AddMinedBlock";

pub const START_SYNC: &str = "StartSync";
pub const PEER_SYNCED: &str = "PeerSynced";
pub const SYNC_QUORUM: &str = "SyncQuorum";

pub const REQUEST_HEADERS: &str = "RequestHeaders";
pub const RECEIVE_HEADERS: &str = "ReceiveHeaders";
pub const REQUEST_BLOCK: &str = "RequestBlock";
pub const RECEIVE_BLOCK: &str = "ReceiveBlock";
pub const RECEIVE_TRANSACTIONS: &str = "ReceiveTransactions";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const SEND_SYNC_RESPONSE: &str = "SendSyncResponse";

pub const BAN_PEER: &str = "BanPeer";
pub const BAN_ADDRESS: &str = "BanAddress";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertHeaderEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &InsertHeaderEvent| {
            log::info!(
                "{}, {}, {}, {}",
                INSERT_HEADER,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.header.hash.bytes()),
                event.header.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for VerifyBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &VerifyBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                VERIFY_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes()),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for InvalidateBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &InvalidateBlockEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                INVALIDATE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes()),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for AdvanceTipEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &AdvanceTipEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ADVANCE_TIP,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes()),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for SideBranchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &SideBranchEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SIDE_BRANCH,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes()),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for CreateSnapshotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &CreateSnapshotEvent| {
            log::info!(
                "{}, {}, {}",
                CREATE_SNAPSHOT,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for RecycleSnapshotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RecycleSnapshotEvent| {
            log::info!(
                "{}, {}, {}",
                RECYCLE_SNAPSHOT,
                secs_since_unix_epoch(event.timestamp),
                event.deleted
            )
        };
        Box::new(logger)
    }
}

impl Logger for AddMinedBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &AddMinedBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ADD_MINED_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block.bytes()),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.from
            )
        };
        Box::new(logger)
    }
}

impl Logger for PeerSyncedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &PeerSyncedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PEER_SYNCED,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for SyncQuorumEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &SyncQuorumEvent| {
            log::info!(
                "{}, {}, {}",
                SYNC_QUORUM,
                secs_since_unix_epoch(event.timestamp),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for RequestHeadersEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RequestHeadersEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}",
                REQUEST_HEADERS,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.from,
                event.limit
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveHeadersEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveHeadersEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                RECEIVE_HEADERS,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for RequestBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RequestBlockEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                REQUEST_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                first_seven_base64_chars(&event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveBlockEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                RECEIVE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                first_seven_base64_chars(&event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveTransactionsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveTransactionsEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                RECEIVE_TRANSACTIONS,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveSyncRequestEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.from,
                event.limit
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &SendSyncResponseEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                SEND_SYNC_RESPONSE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for BanPeerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &BanPeerEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                BAN_PEER,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.to_bytes()),
                event.level
            )
        };
        Box::new(logger)
    }
}

impl Logger for BanAddressEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &BanAddressEvent| {
            log::warn!(
                "{}, {}, {}",
                BAN_ADDRESS,
                secs_since_unix_epoch(event.timestamp),
                event.address
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the
// first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
