//! # Cryptographic Primitives
//!
//! Thin, typed wrappers over audited implementations:
//!
//! - **Ed25519** (ed25519-dalek) for message and block signatures.
//! - **BLAKE3** for every hash and Merkle root.
//!
//! Nothing here is clever on purpose.

pub mod address;
pub mod hash;
pub mod keys;

pub use address::{Address, MAIN_TOKEN};
pub use hash::{blake3_hash, blake3_hash_multi, merkle_root, Hash, ZERO_HASH};
pub use keys::{KestrelKeypair, KestrelPublicKey, KestrelSignature, KeyError};
