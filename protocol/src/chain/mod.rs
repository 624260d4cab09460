//! # Chain Engine
//!
//! Builds, validates, inserts and rolls back blocks. [`Chain`] owns the
//! tip and the last-height cursor; the three status roots live in
//! [`Status`](crate::status::Status) but only ever move under the chain's
//! write lock, so a reader never sees new roots with an old height.
//!
//! ```text
//! engine.rs  - Chain: open, build, insert, rollback, reads
//! genesis.rs - block 0 from config
//! reward.rs  - coinbase schedule
//! error.rs   - ChainError
//! ```
//!
//! ## Insert
//!
//! ```text
//!  1. height <= last      -> Repeat if it is the tip, else StaleBlock
//!  2. height == last + 1
//!  3. msg_root recomputes
//!  4. header roots == current roots
//!  5. parent resolves and is the tip
//!  6. check_header, check_seal
//!  7. coinbase, per-message structure, one per sender, status checks
//!  8. apply and commit
//!  9. persist (tries re-pointed at the pre-state on failure)
//! 10. advance tip and confirmed height
//! 11. notify the applied-message sink, outside the lock
//! ```

mod engine;
mod error;
pub mod genesis;
pub mod reward;

pub use engine::Chain;
pub use error::{ChainError, ChainResult};

use crate::message::Message;

/// What `insert` did with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The block is the current tip already.
    Repeat,
}

/// Receives the messages of every inserted block.
pub trait AppliedSink: Send + Sync {
    fn delete_applied(&self, messages: &[Message]);
}
