//! # Block Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Header                                     │
//! │  ├── version: u32                           │
//! │  ├── hash: [u8; 32]      (BLAKE3 of header) │
//! │  ├── pre_hash: [u8; 32]                     │
//! │  ├── msg_root: [u8; 32]                     │
//! │  ├── act_root / dpos_root / token_root      │
//! │  ├── height, time, cycle: u64               │
//! │  ├── signer: Address                        │
//! │  └── signature                              │
//! ├─────────────────────────────────────────────┤
//! │  messages: Vec<Message>   (coinbase last)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The header hash covers every field except `hash` and `signature`; the
//! signature is over the hash.
//!
//! ## Roots
//!
//! The three roots in a header commit to the state the block was built
//! **on**. A block is only valid on top of a chain whose current roots
//! match; the roots produced by applying it show up in the child header.
//!
//! ## Message Root
//!
//! `msg_root = BLAKE3(hash_0 || hash_1 || ...)` in block order.

use serde::{Deserialize, Serialize};

use crate::config::BLOCK_VERSION;
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, Hash, KestrelKeypair, KestrelSignature, ZERO_HASH};
use crate::message::Message;

// ---------------------------------------------------------------------------
// Roots
// ---------------------------------------------------------------------------

/// The three status trie roots, always moved around together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roots {
    pub act: Hash,
    pub dpos: Hash,
    pub token: Hash,
}

impl Roots {
    pub const EMPTY: Roots = Roots {
        act: ZERO_HASH,
        dpos: ZERO_HASH,
        token: ZERO_HASH,
    };
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub hash: Hash,
    /// Parent header hash. Zero for genesis.
    pub pre_hash: Hash,
    pub msg_root: Hash,
    pub act_root: Hash,
    pub dpos_root: Hash,
    pub token_root: Hash,
    pub height: u64,
    /// Slot timestamp in seconds.
    pub time: u64,
    /// `time / cycle_interval`.
    pub cycle: u64,
    pub signer: Address,
    pub signature: KestrelSignature,
}

impl Header {
    /// Build an unsigned header with its hash filled in.
    pub fn new(
        pre_hash: Hash,
        msg_root: Hash,
        roots: Roots,
        height: u64,
        time: u64,
        cycle: u64,
        signer: Address,
    ) -> Self {
        let mut header = Self {
            version: BLOCK_VERSION,
            hash: ZERO_HASH,
            pre_hash,
            msg_root,
            act_root: roots.act,
            dpos_root: roots.dpos,
            token_root: roots.token,
            height,
            time,
            cycle,
            signer,
            signature: KestrelSignature::default(),
        };
        header.hash = header.compute_hash();
        header
    }

    pub fn roots(&self) -> Roots {
        Roots {
            act: self.act_root,
            dpos: self.dpos_root,
            token: self.token_root,
        }
    }

    /// Little-endian preimage over every field except hash and signature.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.pre_hash);
        hasher.update(&self.msg_root);
        hasher.update(&self.act_root);
        hasher.update(&self.dpos_root);
        hasher.update(&self.token_root);
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&self.time.to_le_bytes());
        hasher.update(&self.cycle.to_le_bytes());
        hasher.update(self.signer.as_bytes());
        *hasher.finalize().as_bytes()
    }

    pub fn sign(&mut self, keypair: &KestrelKeypair) {
        self.signature = keypair.sign(&self.hash);
    }

    /// Check the signature against the header's own signer field.
    pub fn verify_signature(&self) -> bool {
        self.signer.public_key().verify(&self.hash, &self.signature)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn short_hash(&self) -> String {
        short_hex(&self.hash)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub messages: Vec<Message>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    /// Non-coinbase messages, i.e. the ones a sender paid for.
    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.is_coinbase())
    }

    /// Sum of fees over user messages.
    pub fn total_fees(&self) -> Option<u64> {
        self.user_messages()
            .try_fold(0u64, |acc, m| acc.checked_add(m.fee))
    }
}

/// `BLAKE3(concat(message hashes))`.
pub fn compute_msg_root(messages: &[Message]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for msg in messages {
        hasher.update(&msg.hash);
    }
    *hasher.finalize().as_bytes()
}
