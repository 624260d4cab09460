//! # DPoS Consensus
//!
//! Who may produce which block, and when a block becomes final.
//!
//! ```text
//! election.rs - weigh, rank and shuffle candidates for a cycle
//! dpos.rs     - leader schedule, header/seal checks, confirmation
//! ```
//!
//! Time is divided into cycles of `cycle_interval` seconds and slots of
//! `block_interval` seconds. Each cycle has an elected, shuffled list of
//! supers; slot `k` of the cycle belongs to `supers[k mod len]`.
//!
//! A block advances through these states on a validating node:
//!
//! ```text
//! Received -> StructurallyChecked -> SlotChecked -> SignerChecked
//!          -> MessagesChecked -> Applied -> (Confirmed | Pending)
//! ```
//!
//! This module covers everything up to `SignerChecked` plus the
//! confirmation walk; the chain engine does the rest.

pub mod dpos;
pub mod election;

use thiserror::Error;

use crate::crypto::Address;
use crate::status::StatusError;
use crate::storage::DbError;

pub use crate::status::{Member, Supers};
pub use dpos::{Dpos, SealOutcome};

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("storage error: {0}")]
    Db(#[from] DbError),

    #[error("status error: {0}")]
    Status(#[from] StatusError),

    #[error("not enough candidates: have {have}, need {need}")]
    NotEnoughCandidates { have: usize, need: usize },

    #[error("no supers elected for cycle {cycle}")]
    NoSupers { cycle: u64 },

    #[error("time {time} is not on a slot boundary")]
    NotSlotAligned { time: u64 },

    #[error("unsupported header version {got}")]
    WrongVersion { got: u32 },

    #[error("header is unsigned")]
    MissingSignature,

    #[error("header does not extend {expected}: pre_hash {got}")]
    WrongParent { expected: String, got: String },

    #[error("wrong height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("wrong cycle: expected {expected}, got {got}")]
    WrongCycle { expected: u64, got: u64 },

    #[error("block time {time} is less than one interval after parent {parent_time}")]
    TooEarly { parent_time: u64, time: u64 },

    #[error("header hash mismatch")]
    HashMismatch,

    #[error("block time {time} is not a valid next slot after {parent_time}")]
    WrongSlot { parent_time: u64, time: u64 },

    #[error("genesis is not sealed by a producer")]
    GenesisSeal,

    #[error("height {height} is already confirmed (confirmed {confirmed})")]
    AlreadyConfirmed { height: u64, confirmed: u64 },

    #[error("slot belongs to {expected}, block signed by {got}")]
    WrongSigner { expected: Address, got: Address },

    #[error("header signature does not verify")]
    BadSignature,

    #[error("missing header {0}")]
    MissingHeader(String),
}

impl ConsensusError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Db(_) | Self::MissingHeader(_) => true,
            Self::Status(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
