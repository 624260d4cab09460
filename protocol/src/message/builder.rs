//! Message construction via the builder pattern.
//!
//! ```
//! use kestrel_protocol::crypto::{Address, KestrelKeypair, MAIN_TOKEN};
//! use kestrel_protocol::message::MessageBuilder;
//!
//! let kp = KestrelKeypair::from_seed(&[1u8; 32]);
//! let msg = MessageBuilder::transfer(Address([2u8; 32]), MAIN_TOKEN, 100)
//!     .nonce(1)
//!     .fee(5)
//!     .time(1_700_000_000)
//!     .sign(&kp);
//! assert_eq!(msg.nonce, 1);
//! ```

use super::types::{Message, MessageBody};
use crate::crypto::{Address, KestrelKeypair};

/// Fluent builder for [`Message`].
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    body: MessageBody,
    nonce: u64,
    fee: u64,
    time: u64,
}

impl MessageBuilder {
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            nonce: 0,
            fee: 0,
            time: 0,
        }
    }

    pub fn transfer(to: Address, token: Address, amount: u64) -> Self {
        Self::new(MessageBody::Transfer { to, token, amount })
    }

    pub fn vote(to: Address) -> Self {
        Self::new(MessageBody::Vote { to })
    }

    pub fn candidate(peer_id: impl Into<String>) -> Self {
        Self::new(MessageBody::Candidate {
            peer_id: peer_id.into(),
        })
    }

    pub fn cancel_candidate() -> Self {
        Self::new(MessageBody::CancelCandidate)
    }

    pub fn work_report(cycle: u64, work: u64) -> Self {
        Self::new(MessageBody::WorkReport { cycle, work })
    }

    pub fn token_issue(
        name: impl Into<String>,
        shorthand: impl Into<String>,
        increase_allowed: bool,
        amount: u64,
    ) -> Self {
        Self::new(MessageBody::TokenIssue {
            name: name.into(),
            shorthand: shorthand.into(),
            increase_allowed,
            amount,
        })
    }

    pub fn contract(contract: Address, method: impl Into<String>, args: Vec<u8>) -> Self {
        Self::new(MessageBody::Contract {
            contract,
            method: method.into(),
            args,
        })
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn time(mut self, time: u64) -> Self {
        self.time = time;
        self
    }

    /// Finish the message from `keypair`'s address and sign its hash.
    pub fn sign(self, keypair: &KestrelKeypair) -> Message {
        let mut msg = self.build_unsigned(Address::from(keypair.public_key()));
        msg.signature = keypair.sign(&msg.hash);
        msg
    }

    /// Finish without a signature. Used for coinbase and genesis messages,
    /// which are authenticated by the block rather than by their sender.
    pub fn build_unsigned(self, from: Address) -> Message {
        Message::new_unsigned(from, self.nonce, self.fee, self.time, self.body)
    }

    /// The producer's reward message for the block at `height`. The nonce
    /// is the height, which keeps coinbase hashes unique across blocks.
    pub fn coinbase(to: Address, amount: u64, height: u64, time: u64) -> Message {
        Self::new(MessageBody::Coinbase { to, amount })
            .nonce(height)
            .time(time)
            .build_unsigned(Address::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MAIN_TOKEN;

    #[test]
    fn signed_message_has_sender_and_valid_signature() {
        let kp = KestrelKeypair::from_seed(&[4u8; 32]);
        let msg = MessageBuilder::vote(Address([9u8; 32]))
            .nonce(3)
            .fee(1)
            .sign(&kp);
        assert_eq!(msg.from, Address::from(kp.public_key()));
        assert_eq!(msg.hash, msg.compute_hash());
        assert!(kp.public_key().verify(&msg.hash, &msg.signature));
    }

    #[test]
    fn coinbase_is_unsigned_from_zero() {
        let cb = MessageBuilder::coinbase(Address([1u8; 32]), 50, 12, 0);
        assert!(cb.is_coinbase());
        assert!(cb.from.is_zero());
        assert!(cb.signature.is_empty());
        assert_eq!(cb.nonce, 12);
    }

    #[test]
    fn coinbase_hash_differs_per_height() {
        let a = MessageBuilder::coinbase(Address([1u8; 32]), 50, 1, 0);
        let b = MessageBuilder::coinbase(Address([1u8; 32]), 50, 2, 0);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn builder_defaults_are_zero() {
        let msg = MessageBuilder::transfer(Address([2u8; 32]), MAIN_TOKEN, 1)
            .build_unsigned(Address([1u8; 32]));
        assert_eq!((msg.nonce, msg.fee, msg.time), (0, 0, 0));
    }
}
