//! Genesis block construction and verification.
//!
//! Block 0 carries one coinbase per pre-allocation followed by one
//! `Candidate` message per bootstrap candidate. It has no parent, no
//! producer and no signature, and it is built on the empty roots.

use crate::config::ChainConfig;
use crate::crypto::{Address, ZERO_HASH};
use crate::message::{verify_coinbase, Message, MessageBody, MessageBuilder};
use crate::storage::{compute_msg_root, Block, Header, Roots};

use super::{ChainError, ChainResult};

pub fn genesis_messages(config: &ChainConfig) -> Vec<Message> {
    let time = config.genesis.time;
    let allocations = config
        .genesis
        .allocations
        .iter()
        .map(|a| MessageBuilder::coinbase(a.address, a.amount, 0, time));
    let candidates = config.genesis.candidates.iter().map(|c| {
        MessageBuilder::candidate(c.peer_id.clone())
            .nonce(1)
            .time(time)
            .build_unsigned(c.address)
    });
    allocations.chain(candidates).collect()
}

pub fn build_genesis(config: &ChainConfig) -> Block {
    let messages = genesis_messages(config);
    let header = Header::new(
        ZERO_HASH,
        compute_msg_root(&messages),
        Roots::EMPTY,
        0,
        config.genesis.time,
        config.cycle_of(config.genesis.time),
        Address::ZERO,
    );
    Block { header, messages }
}

/// Reject a genesis block whose allocations do not add up to
/// `pre_circulation`, or whose shape is not that of block 0.
pub fn verify_genesis(config: &ChainConfig, block: &Block) -> ChainResult<()> {
    let header = &block.header;
    if header.height != 0 || header.pre_hash != ZERO_HASH {
        return Err(ChainError::InvalidGenesis("not a height-0 root block".into()));
    }
    if header.roots() != Roots::EMPTY {
        return Err(ChainError::InvalidGenesis("must be built on empty roots".into()));
    }
    if header.compute_hash() != header.hash {
        return Err(ChainError::InvalidGenesis("header hash mismatch".into()));
    }
    if compute_msg_root(&block.messages) != header.msg_root {
        return Err(ChainError::MsgRootMismatch);
    }
    if config.pre_circulation > config.total_circulation {
        return Err(ChainError::InvalidGenesis(format!(
            "pre-circulation {} exceeds total circulation {}",
            config.pre_circulation, config.total_circulation
        )));
    }

    let mut allocated = 0u64;
    for msg in &block.messages {
        match &msg.body {
            MessageBody::Coinbase { amount, .. } => {
                verify_coinbase(msg).map_err(|source| ChainError::Message {
                    hash: crate::crypto::hash::short_hex(&msg.hash),
                    source,
                })?;
                allocated = allocated
                    .checked_add(*amount)
                    .ok_or(ChainError::Overflow("genesis allocations"))?;
            }
            MessageBody::Candidate { .. } => {}
            other => {
                return Err(ChainError::InvalidGenesis(format!(
                    "unexpected {} message",
                    other.kind()
                )))
            }
        }
    }
    if allocated != config.pre_circulation {
        return Err(ChainError::GenesisMismatch {
            allocated,
            expected: config.pre_circulation,
        });
    }
    Ok(())
}
