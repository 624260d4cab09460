//! Message verification: structural checks and signature validation.
//!
//! These checks need no state. Account-level checks (nonce, balance,
//! candidate existence) belong to the status layer. The order here runs
//! from cheapest to most expensive so malformed input fails before any
//! signature work.

use thiserror::Error;

use super::types::{Message, MessageBody, MessageKind};
use crate::config::{
    MAX_CONTRACT_ARGS_LEN, MAX_PEER_ID_LEN, MAX_SHORTHAND_LEN, MAX_TOKEN_NAME_LEN,
    MIN_SHORTHAND_LEN,
};
use crate::crypto::hash::short_hex;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("message is unsigned")]
    MissingSignature,

    #[error("signature does not verify against sender {sender}")]
    InvalidSignature { sender: String },

    #[error("sender address is zero")]
    ZeroSender,

    #[error("invalid nonce: must be > 0")]
    ZeroNonce,

    #[error("amount must be > 0")]
    ZeroAmount,

    #[error("sender and receiver must differ")]
    SelfTransfer,

    #[error("{kind} messages cannot be submitted")]
    Reserved { kind: MessageKind },

    #[error("malformed coinbase: {0}")]
    MalformedCoinbase(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Full structural verification of a user-submitted message.
///
/// 1. Coinbase is rejected; it is only valid when synthesized into a block.
/// 2. Sender is non-zero and nonce is positive.
/// 3. Body fields are within bounds.
/// 4. The stored hash matches the canonical encoding.
/// 5. The signature verifies against the sender.
pub fn verify_message(msg: &Message) -> Result<(), MessageError> {
    if msg.is_coinbase() {
        return Err(MessageError::Reserved {
            kind: MessageKind::Coinbase,
        });
    }
    if msg.from.is_zero() {
        return Err(MessageError::ZeroSender);
    }
    if msg.nonce == 0 {
        return Err(MessageError::ZeroNonce);
    }

    verify_body(msg)?;
    verify_hash(msg)?;

    if msg.signature.is_empty() {
        return Err(MessageError::MissingSignature);
    }
    if !msg.from.public_key().verify(&msg.hash, &msg.signature) {
        return Err(MessageError::InvalidSignature {
            sender: msg.from.to_base58(),
        });
    }

    Ok(())
}

/// Checks a synthesized coinbase: zero sender, no fee, no signature,
/// positive-or-zero amount and a correct hash. The amount itself is checked
/// by the chain, which knows the reward schedule.
pub fn verify_coinbase(msg: &Message) -> Result<(), MessageError> {
    let MessageBody::Coinbase { to, .. } = &msg.body else {
        return Err(MessageError::MalformedCoinbase("not a coinbase body".into()));
    };
    if !msg.from.is_zero() {
        return Err(MessageError::MalformedCoinbase("sender must be zero".into()));
    }
    if to.is_zero() {
        return Err(MessageError::MalformedCoinbase("receiver is zero".into()));
    }
    if msg.fee != 0 {
        return Err(MessageError::MalformedCoinbase("coinbase carries a fee".into()));
    }
    if !msg.signature.is_empty() {
        return Err(MessageError::MalformedCoinbase("coinbase is signed".into()));
    }
    verify_hash(msg)
}

/// Recompute and compare the message hash.
pub fn verify_hash(msg: &Message) -> Result<(), MessageError> {
    let expected = msg.compute_hash();
    if expected != msg.hash {
        return Err(MessageError::HashMismatch {
            expected: short_hex(&expected),
            actual: short_hex(&msg.hash),
        });
    }
    Ok(())
}

fn verify_body(msg: &Message) -> Result<(), MessageError> {
    match &msg.body {
        MessageBody::Transfer { to, amount, .. } => {
            if *amount == 0 {
                return Err(MessageError::ZeroAmount);
            }
            if to.is_zero() {
                return Err(invalid("to", "receiver is zero"));
            }
            if *to == msg.from {
                return Err(MessageError::SelfTransfer);
            }
        }
        MessageBody::TokenIssue {
            name,
            shorthand,
            amount,
            ..
        } => {
            if *amount == 0 {
                return Err(MessageError::ZeroAmount);
            }
            if name.is_empty() || name.len() > MAX_TOKEN_NAME_LEN {
                return Err(invalid("name", format!("length {} out of range", name.len())));
            }
            validate_shorthand(shorthand)?;
        }
        MessageBody::Candidate { peer_id } => {
            if peer_id.is_empty() || peer_id.len() > MAX_PEER_ID_LEN {
                return Err(invalid(
                    "peer_id",
                    format!("length {} out of range", peer_id.len()),
                ));
            }
        }
        MessageBody::CancelCandidate => {}
        MessageBody::Vote { to } => {
            if to.is_zero() {
                return Err(invalid("to", "vote target is zero"));
            }
        }
        MessageBody::WorkReport { work, .. } => {
            if *work == 0 {
                return Err(invalid("work", "work must be > 0"));
            }
        }
        MessageBody::Contract { method, args, .. } => {
            if method.is_empty() {
                return Err(invalid("method", "empty method name"));
            }
            if args.len() > MAX_CONTRACT_ARGS_LEN {
                return Err(invalid("args", format!("{} bytes exceeds limit", args.len())));
            }
        }
        MessageBody::Coinbase { .. } => {
            return Err(MessageError::Reserved {
                kind: MessageKind::Coinbase,
            })
        }
    }
    Ok(())
}

/// Shorthands are 2–8 uppercase ASCII letters or digits.
pub fn validate_shorthand(shorthand: &str) -> Result<(), MessageError> {
    let len_ok = (MIN_SHORTHAND_LEN..=MAX_SHORTHAND_LEN).contains(&shorthand.len());
    let chars_ok = shorthand
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !len_ok || !chars_ok {
        return Err(invalid("shorthand", format!("{shorthand:?} is not 2-8 of [A-Z0-9]")));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> MessageError {
    MessageError::InvalidField {
        field,
        reason: reason.into(),
    }
}
