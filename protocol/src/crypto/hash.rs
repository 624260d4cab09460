//! # Hashing Utilities
//!
//! Every digest in Kestrel is BLAKE3: header hashes, message hashes,
//! message roots, trie roots and the election seed. One hash function,
//! one 32-byte output type.
//!
//! Consensus depends on these functions being bit-for-bit stable. Changing
//! the preimage layout of anything hashed here is a hard fork.

/// A 32-byte BLAKE3 digest.
pub type Hash = [u8; 32];

/// The all-zero hash. Used as the root of an empty trie and as the
/// parent pointer of the genesis header.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Compute the BLAKE3 hash of the input data.
///
/// ```
/// use kestrel_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"kestrel");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Domain-separated hash using BLAKE3's `derive_key` mode.
///
/// Two calls with different contexts never collide even on identical
/// data. Used where a digest doubles as an identifier (token addresses).
pub fn domain_separated_hash(context: &str, data: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash multiple byte slices as if they were concatenated.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Compute a binary Merkle root over a list of leaf hashes.
///
/// Internal nodes are `BLAKE3(left || right)`. An odd node at any level is
/// paired with itself. A single leaf is also paired with itself so the
/// root is always the output of a hash. The empty list yields
/// [`ZERO_HASH`].
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return ZERO_HASH;
    }

    let mut current_level: Vec<Hash> = leaves.to_vec();

    if current_level.len() == 1 {
        return blake3_hash_multi(&[current_level[0].as_slice(), current_level[0].as_slice()]);
    }

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity((current_level.len() + 1) / 2);

        for chunk in current_level.chunks(2) {
            let left = &chunk[0];
            let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
            next_level.push(blake3_hash_multi(&[left.as_slice(), right.as_slice()]));
        }

        current_level = next_level;
    }

    current_level[0]
}

/// Short hex prefix of a hash, for log fields.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..6])
}
