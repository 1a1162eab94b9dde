//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Number that uniquely identifies a blockchain.
///
/// Every header in the same chain should share the same `ChainID`, which in turn should be unique
/// between different chains. All nodes that replicate the same chain should be configured to use
/// the same `ChainID`. The serving side refuses requests that carry a foreign `ChainID`
/// ([`HeadersError::UnknownChain`](crate::sync::messages::HeadersError::UnknownChain)); on the
/// requesting side a reply echoing a foreign `ChainID` fails echo matching and is treated as a
/// protocol violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Height of a block in the chain.
///
/// Starts at 0 for the genesis block and increases by 1 for every level of blocks connected by
/// parent links.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `BlockHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Subtract `rhs` from the inner value, saturating at 0.
    pub fn saturating_sub(&self, rhs: u64) -> BlockHeight {
        BlockHeight::new(self.0.saturating_sub(rhs))
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// 32-byte cryptographic hash.
///
/// Within chainrep, `CryptoHash`-es identify headers, blocks, and snapshots (a snapshot is keyed by
/// the hash of the block whose execution produced it). Header hashes are always SHA256 hashes;
/// digests carried inside headers ([`state_digest`](super::header::Header::state_digest) and
/// friends) can be any 32-byte cryptographic hash the execution layer chooses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Get the lowercase hex encoding of this `CryptoHash`, used for on-disk addressing.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

/// Ed25519 digital signature.
///
/// Within chainrep, these are produced using the [`ed25519_dalek`] crate.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// Ed25519 verifying key, stored as raw bytes so that it can be borsh-serialized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct VerifyingKeyBytes([u8; 32]);

impl VerifyingKeyBytes {
    /// Create a new `VerifyingKeyBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `VerifyingKeyBytes`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// Seconds since the Unix epoch. Recorded in headers when they are produced.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` wrapping `secs`.
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the inner `u64` value of this `Timestamp`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Name of a table in the ledger state. Tables are created and altered through
/// [redo operations](crate::state::redo::RedoOp).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct TableName(String);

impl TableName {
    /// Create a new `TableName` wrapping `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the inner `str` of this `TableName`.
    pub fn str(&self) -> &str {
        &self.0
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for TableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
