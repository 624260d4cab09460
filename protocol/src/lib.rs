// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Kestrel Protocol: Consensus Core
//!
//! The part of a Kestrel node that every peer must execute identically,
//! byte for byte: deciding who may produce the next block, validating and
//! applying blocks deterministically, committing state into Merkle tries,
//! and keeping a fee-ordered pool of pending messages.
//!
//! ## Architecture
//!
//! Modules are listed leaves first:
//!
//! - **crypto**: BLAKE3 hashing, Merkle roots, Ed25519 keys, addresses.
//! - **config**: Protocol constants and the immutable chain configuration.
//! - **message**: Signed state-transition requests and their checks.
//! - **storage**: Headers, blocks, the sled-backed chain index and the
//!   content-addressed trie adapter.
//! - **status**: Account, DPos and Token sub-stores behind one façade,
//!   including journaled two-phase settlement.
//! - **consensus**: Cycle election, leader schedule and finality.
//! - **chain**: Block construction, insertion and rollback.
//! - **mempool**: Dual-queue (cache / ready) admission, fee priority.
//! - **producer**: The slot timer that drives block production.
//!
//! ## Ground rules
//!
//! 1. Nothing in this crate reads process-global state. Configuration is
//!    built once and handed to constructors.
//! 2. Validation never mutates. State changes start only after every
//!    check on a block has passed.
//! 3. A block that fails is discarded whole; no partial block is persisted.

pub mod chain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod mempool;
pub mod message;
pub mod producer;
pub mod status;
pub mod storage;
