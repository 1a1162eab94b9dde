//! Definitions for the 'header' type, its verification state, and header signing.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
pub use sha2::Sha256 as CryptoHasher;
use sha2::Digest;

use crate::types::data_types::{
    BlockHeight, CryptoHash, SignatureBytes, Timestamp, VerifyingKeyBytes,
};

/// Hashable summary of a block: parent link, timestamp, and the digests that commit to the block's
/// content and the ledger state after its execution.
///
/// A `Header` is immutable once hashed: [`hash`](Header::hash) covers every field except the hash
/// itself and the (detachable) signature [`envelope`](Header::envelope). The `extra` field carries
/// opaque consensus bytes (e.g. a PoW nonce or a DPoS round number) that the engine stores and
/// forwards but never interprets; interpreting them is the job of the
/// [`HeaderPolicy`](crate::chain::policy::HeaderPolicy) plugged in by the consensus layer.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Header {
    pub height: BlockHeight,
    pub hash: CryptoHash,
    pub parent: CryptoHash,
    pub timestamp: Timestamp,

    /// Digest of the ledger state immediately after executing this block.
    pub state_digest: CryptoHash,

    /// Digest over the block's ordered transactions.
    pub tx_root: CryptoHash,

    /// Digest over the block's ordered receipts.
    pub receipts_digest: CryptoHash,

    /// Opaque consensus-defined bytes.
    pub extra: Vec<u8>,

    /// Signature over [`signing_bytes`](Signable::signing_bytes), if the header variant is signed.
    pub envelope: Option<SignatureEnvelope>,
}

impl Header {
    pub fn new(
        height: BlockHeight,
        parent: CryptoHash,
        timestamp: Timestamp,
        state_digest: CryptoHash,
        tx_root: CryptoHash,
        receipts_digest: CryptoHash,
        extra: Vec<u8>,
    ) -> Header {
        let hash = Header::compute_hash(
            height,
            &parent,
            timestamp,
            &state_digest,
            &tx_root,
            &receipts_digest,
            &extra,
        );
        Header {
            height,
            hash,
            parent,
            timestamp,
            state_digest,
            tx_root,
            receipts_digest,
            extra,
            envelope: None,
        }
    }

    pub fn compute_hash(
        height: BlockHeight,
        parent: &CryptoHash,
        timestamp: Timestamp,
        state_digest: &CryptoHash,
        tx_root: &CryptoHash,
        receipts_digest: &CryptoHash,
        extra: &[u8],
    ) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(&height.try_to_vec().unwrap());
        hasher.update(&parent.try_to_vec().unwrap());
        hasher.update(&timestamp.try_to_vec().unwrap());
        hasher.update(&state_digest.try_to_vec().unwrap());
        hasher.update(&tx_root.try_to_vec().unwrap());
        hasher.update(&receipts_digest.try_to_vec().unwrap());
        hasher.update(extra);
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks whether the `hash` field is the actual hash of the header's contents.
    pub fn is_correct(&self) -> bool {
        self.hash
            == Header::compute_hash(
                self.height,
                &self.parent,
                self.timestamp,
                &self.state_digest,
                &self.tx_root,
                &self.receipts_digest,
                &self.extra,
            )
    }
}

impl Signable for Header {
    fn signing_bytes(&self) -> Vec<u8> {
        self.hash.bytes().to_vec()
    }

    fn envelope(&self) -> Option<&SignatureEnvelope> {
        self.envelope.as_ref()
    }

    fn attach(&mut self, envelope: SignatureEnvelope) {
        self.envelope = Some(envelope)
    }
}

/// A detachable signature carried inside a signable value.
///
/// Header variants that require signing (e.g. DPoS block-producer headers) embed one of these
/// instead of subclassing the header type; which variants require one, and whose key must have
/// produced it, is decided by the consensus layer's
/// [`HeaderPolicy`](crate::chain::policy::HeaderPolicy).
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignatureEnvelope {
    pub signer: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl SignatureEnvelope {
    /// Sign `msg` with `keypair`, producing an envelope naming the keypair's verifying key as the
    /// signer.
    pub fn sign(keypair: &SigningKey, msg: &[u8]) -> SignatureEnvelope {
        let signature = keypair.sign(msg);
        SignatureEnvelope {
            signer: VerifyingKeyBytes::new(keypair.verifying_key().to_bytes()),
            signature: SignatureBytes::new(signature.to_bytes()),
        }
    }

    /// Check that the envelope's signature over `msg` verifies under the envelope's signer key.
    /// Returns `false` if the signer bytes do not decode to a valid key.
    pub fn verify(&self, msg: &[u8]) -> bool {
        match VerifyingKey::from_bytes(&self.signer.bytes()) {
            Ok(verifying_key) => verifying_key
                .verify(msg, &Signature::from_bytes(&self.signature.bytes()))
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Values with an embedded, detachable signature envelope.
pub trait Signable {
    /// The bytes the envelope's signature must cover.
    fn signing_bytes(&self) -> Vec<u8>;

    /// The currently attached envelope, if any.
    fn envelope(&self) -> Option<&SignatureEnvelope>;

    /// Attach `envelope`, replacing any existing one.
    fn attach(&mut self, envelope: SignatureEnvelope);

    /// Sign the value's [`signing_bytes`](Signable::signing_bytes) with `keypair` and attach the
    /// resulting envelope.
    fn sign(&mut self, keypair: &SigningKey) {
        let envelope = SignatureEnvelope::sign(keypair, &self.signing_bytes());
        self.attach(envelope)
    }

    /// Check the attached envelope against the value's signing bytes. A value without an envelope
    /// is not correctly signed.
    fn is_correctly_signed(&self) -> bool {
        match self.envelope() {
            Some(envelope) => envelope.verify(&self.signing_bytes()),
            None => false,
        }
    }
}

/// Per-header verification status.
///
/// Transitions are monotonic: a header starts `NotVerified` and ends up either `Verified` or
/// `Invalid`, both of which are terminal. [`HeaderStore`](crate::state::pluggables::HeaderStore)
/// implementations must refuse any other transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum VerifyState {
    NotVerified,
    Verified,
    Invalid,
}

impl VerifyState {
    /// Whether a transition from `self` to `next` preserves monotonicity.
    pub fn may_become(&self, next: VerifyState) -> bool {
        match self {
            VerifyState::NotVerified => true,
            VerifyState::Verified => next == VerifyState::Verified,
            VerifyState::Invalid => next == VerifyState::Invalid,
        }
    }
}

impl Display for VerifyState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VerifyState::NotVerified => f.write_str("NotVerified"),
            VerifyState::Verified => f.write_str("Verified"),
            VerifyState::Invalid => f.write_str("Invalid"),
        }
    }
}
