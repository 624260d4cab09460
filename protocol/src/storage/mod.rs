//! # Storage Module
//!
//! ```text
//! block.rs  - Header, Block, Roots and the message root
//! db.rs     - sled-backed block store and canonical indexes
//! trie.rs   - versioned key-value tries behind the status layer
//! ```
//!
//! Everything on disk is bincode. One sled database holds the `chain`
//! tree plus one tree per status trie, so a node's whole state is a
//! single directory.

pub mod block;
pub mod db;
pub mod trie;

pub use block::{compute_msg_root, Block, Header, Roots};
pub use db::{ChainDb, DbError, DbResult, HeaderReader};
pub use trie::{SledTrie, TrieError, TrieResult, TrieStore};
