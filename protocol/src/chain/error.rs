use thiserror::Error;

use crate::config::ConfigError;
use crate::consensus::ConsensusError;
use crate::crypto::Address;
use crate::message::MessageError;
use crate::status::StatusError;
use crate::storage::DbError;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Db(#[from] DbError),

    #[error("status error: {0}")]
    Status(#[from] StatusError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error("invalid message {hash}: {source}")]
    Message {
        hash: String,
        #[source]
        source: MessageError,
    },

    // -- Insert -------------------------------------------------------------
    #[error("block {height} is at or below the tip {last}")]
    StaleBlock { height: u64, last: u64 },

    #[error("expected height {expected}, got {got}")]
    HeightGap { expected: u64, got: u64 },

    #[error("message root mismatch")]
    MsgRootMismatch,

    #[error("block built on {got}, chain is at {expected}")]
    WrongRoot { expected: String, got: String },

    #[error("unknown parent {0}")]
    UnknownParent(String),

    #[error("parent {0} is not the current tip")]
    ForkParent(String),

    #[error("block has no coinbase")]
    MissingCoinbase,

    #[error("coinbase must be the last and only synthesized message")]
    MisplacedCoinbase,

    #[error("coinbase pays {got}, producer is {expected}")]
    CoinbaseRecipient { expected: Address, got: Address },

    #[error("coinbase amount {got}, expected {expected}")]
    WrongCoinbase { expected: u64, got: u64 },

    #[error("sender {0} appears more than once")]
    DuplicateSender(Address),

    #[error("block messages take {size} bytes, limit is {max}")]
    BlockTooLarge { size: usize, max: usize },

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    // -- Genesis ------------------------------------------------------------
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("genesis allocates {allocated}, pre-circulation is {expected}")]
    GenesisMismatch { allocated: u64, expected: u64 },

    // -- Rollback -----------------------------------------------------------
    #[error("cannot roll back to {target}: confirmed height is {confirmed}")]
    BelowConfirmed { target: u64, confirmed: u64 },

    #[error("cannot roll back to {target}: tip is {last}")]
    AboveTip { target: u64, last: u64 },

    #[error("no confirmed snapshot at height {0}")]
    MissingSnapshot(u64),

    #[error("no header at height {0}")]
    MissingHeader(u64),

    #[error("no post-state roots for block {0}")]
    MissingRoots(String),
}

impl ChainError {
    /// Storage failures leave the node needing operator attention. Block
    /// production stops on them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Db(_) | Self::MissingRoots(_) => true,
            Self::Status(e) => e.is_fatal(),
            Self::Consensus(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DbError;

    #[test]
    fn storage_errors_are_fatal() {
        assert!(ChainError::Db(DbError::NotFound("x".into())).is_fatal());
        assert!(ChainError::Consensus(ConsensusError::MissingHeader("x".into())).is_fatal());
        assert!(!ChainError::MsgRootMismatch.is_fatal());
        assert!(!ChainError::Consensus(ConsensusError::BadSignature).is_fatal());
    }
}
