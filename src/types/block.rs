//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use crate::types::data_types::CryptoHash;
use crate::types::header::{CryptoHasher, Header};

/// An opaque, ordered unit of work inside a block. The engine stores and forwards transaction
/// bytes; decoding and executing them is the execution layer's job.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction(Vec<u8>);

impl Transaction {
    /// Create a new `Transaction` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner `Vec<u8>` of this `Transaction`.
    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}

/// The opaque execution result of one transaction. Every transaction in a block must have exactly
/// one receipt, at the same index.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Receipt(Vec<u8>);

impl Receipt {
    /// Create a new `Receipt` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner `Vec<u8>` of this `Receipt`.
    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}

/// A header together with the transactions and receipts it commits to.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>, receipts: Vec<Receipt>) -> Block {
        Block {
            header,
            transactions,
            receipts,
        }
    }

    /// Get the hash of this block, which is the hash of its header.
    pub fn hash(&self) -> CryptoHash {
        self.header.hash
    }

    /// Compute the digest over an ordered list of transactions.
    pub fn transactions_root(transactions: &[Transaction]) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        for transaction in transactions {
            hasher.update(transaction.bytes());
        }
        CryptoHash::new(hasher.finalize().into())
    }

    /// Compute the digest over an ordered list of receipts.
    pub fn receipts_digest(receipts: &[Receipt]) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        for receipt in receipts {
            hasher.update(receipt.bytes());
        }
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks whether the block's content actually hashes to the digests its header commits to:
    /// the header hash is internally correct, every transaction has a receipt, and the recomputed
    /// transactions root and receipts digest match the header bit-for-bit.
    pub fn is_well_formed(&self) -> bool {
        self.header.is_correct()
            && self.transactions.len() == self.receipts.len()
            && Block::transactions_root(&self.transactions) == self.header.tx_root
            && Block::receipts_digest(&self.receipts) == self.header.receipts_digest
    }
}
