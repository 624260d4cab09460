//! Message types and their canonical encoding.
//!
//! A [`Message`] is a signed request to change state. Its body is a closed
//! sum type so that every consumer (validation, application, the mempool)
//! matches exhaustively and the compiler flags any variant left unhandled.
//!
//! # Canonical Byte Format
//!
//! [`Message::signable_bytes`] serializes, in order: the kind tag, sender,
//! nonce, fee, time (all integers little-endian), then the body fields.
//! Variable-length fields are length-prefixed with a `u32`. The `hash` and
//! `signature` fields are not part of the encoding, so the hash can be
//! computed before signing and does not change afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{blake3_hash, Address, Hash, KestrelSignature, ZERO_HASH};

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The message `type`, derived from the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Transfer,
    TokenIssue,
    Candidate,
    CancelCandidate,
    Vote,
    WorkReport,
    Contract,
    Coinbase,
}

impl MessageKind {
    /// Wire tag. Part of the hash preimage; never renumber.
    pub fn tag(self) -> u8 {
        match self {
            Self::Transfer => 1,
            Self::TokenIssue => 2,
            Self::Candidate => 3,
            Self::CancelCandidate => 4,
            Self::Vote => 5,
            Self::WorkReport => 6,
            Self::Contract => 7,
            Self::Coinbase => 8,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transfer => "transfer",
            Self::TokenIssue => "token_issue",
            Self::Candidate => "candidate",
            Self::CancelCandidate => "cancel_candidate",
            Self::Vote => "vote",
            Self::WorkReport => "work_report",
            Self::Contract => "contract",
            Self::Coinbase => "coinbase",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// MessageBody
// ---------------------------------------------------------------------------

/// What a message asks the chain to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Move `amount` of `token` to `to`.
    Transfer {
        to: Address,
        token: Address,
        amount: u64,
    },
    /// Register a token (or mint more of one the sender issued earlier).
    TokenIssue {
        name: String,
        shorthand: String,
        increase_allowed: bool,
        amount: u64,
    },
    /// Register the sender as a block-production candidate.
    Candidate { peer_id: String },
    /// Withdraw the sender's candidacy.
    CancelCandidate,
    /// Point the sender's vote at candidate `to`, replacing any earlier vote.
    Vote { to: Address },
    /// Report proof-of-work accumulated during `cycle`.
    WorkReport { cycle: u64, work: u64 },
    /// Invoke a read method on a registered token contract.
    Contract {
        contract: Address,
        method: String,
        args: Vec<u8>,
    },
    /// Block reward plus fees. Synthesized by the producer, never admitted
    /// from the network.
    Coinbase { to: Address, amount: u64 },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Transfer { .. } => MessageKind::Transfer,
            Self::TokenIssue { .. } => MessageKind::TokenIssue,
            Self::Candidate { .. } => MessageKind::Candidate,
            Self::CancelCandidate => MessageKind::CancelCandidate,
            Self::Vote { .. } => MessageKind::Vote,
            Self::WorkReport { .. } => MessageKind::WorkReport,
            Self::Contract { .. } => MessageKind::Contract,
            Self::Coinbase { .. } => MessageKind::Coinbase,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Transfer { to, token, amount } => {
                buf.extend_from_slice(to.as_bytes());
                buf.extend_from_slice(token.as_bytes());
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Self::TokenIssue {
                name,
                shorthand,
                increase_allowed,
                amount,
            } => {
                put_bytes(buf, name.as_bytes());
                put_bytes(buf, shorthand.as_bytes());
                buf.push(u8::from(*increase_allowed));
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Self::Candidate { peer_id } => put_bytes(buf, peer_id.as_bytes()),
            Self::CancelCandidate => {}
            Self::Vote { to } => buf.extend_from_slice(to.as_bytes()),
            Self::WorkReport { cycle, work } => {
                buf.extend_from_slice(&cycle.to_le_bytes());
                buf.extend_from_slice(&work.to_le_bytes());
            }
            Self::Contract {
                contract,
                method,
                args,
            } => {
                buf.extend_from_slice(contract.as_bytes());
                put_bytes(buf, method.as_bytes());
                put_bytes(buf, args);
            }
            Self::Coinbase { to, amount } => {
                buf.extend_from_slice(to.as_bytes());
                buf.extend_from_slice(&amount.to_le_bytes());
            }
        }
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A signed state-transition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `BLAKE3(signable_bytes)`.
    pub hash: Hash,
    /// Sender. [`Address::ZERO`] for coinbase and genesis allocations.
    pub from: Address,
    /// Per-sender sequence number; the n-th message of an account has
    /// nonce n.
    pub nonce: u64,
    /// Main-token fee paid to the block producer.
    pub fee: u64,
    /// Creation time in seconds. Informational; consensus does not order
    /// by it.
    pub time: u64,
    /// Ed25519 signature over `hash`. Empty for coinbase.
    pub signature: KestrelSignature,
    pub body: MessageBody,
}

impl Message {
    /// Assemble a message and compute its hash. The signature is left
    /// empty.
    pub fn new_unsigned(from: Address, nonce: u64, fee: u64, time: u64, body: MessageBody) -> Self {
        let mut msg = Self {
            hash: ZERO_HASH,
            from,
            nonce,
            fee,
            time,
            signature: KestrelSignature::default(),
            body,
        };
        msg.hash = msg.compute_hash();
        msg
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.body, MessageBody::Coinbase { .. })
    }

    /// Canonical bytes covered by the hash.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.push(self.kind().tag());
        buf.extend_from_slice(self.from.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.time.to_le_bytes());
        self.body.encode_into(&mut buf);
        buf
    }

    pub fn compute_hash(&self) -> Hash {
        blake3_hash(&self.signable_bytes())
    }

    /// Encoded size as stored and gossiped. Used for block byte budgets.
    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self).map_or(usize::MAX, |n| n as usize)
    }
}
