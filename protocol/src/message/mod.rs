//! # Messages
//!
//! Signed state-transition requests: construction, canonical encoding and
//! stateless verification.

pub mod builder;
pub mod types;
pub mod verification;

pub use builder::MessageBuilder;
pub use types::{Message, MessageBody, MessageKind};
pub use verification::{verify_coinbase, verify_message, MessageError};
