//! # Key Management
//!
//! Ed25519 keypairs for block producers and message senders.
//!
//! A Kestrel address *is* an Ed25519 public key, so there is no separate
//! key-to-address derivation step: whoever holds the signing key for an
//! address can sign messages from it and, if elected, blocks.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (ed25519-dalek does this for us).
//! - Fresh keys come from `OsRng`.
//! - Key bytes are never logged. `Debug` prints the public half only.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or bad encoding")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid address encoding: {0}")]
    InvalidAddress(String),
}

/// A signing identity wrapping an Ed25519 signing key.
///
/// `KestrelKeypair` deliberately does not implement `Serialize`. Exporting
/// a secret is an explicit call to [`secret_key_bytes`](Self::secret_key_bytes).
///
/// # Examples
///
/// ```
/// use kestrel_protocol::crypto::keys::KestrelKeypair;
///
/// let kp = KestrelKeypair::generate();
/// let sig = kp.sign(b"vote for me");
/// assert!(kp.public_key().verify(b"vote for me", &sig));
/// ```
pub struct KestrelKeypair {
    signing_key: SigningKey,
}

/// The public half of a signing identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KestrelPublicKey {
    bytes: [u8; 32],
}

/// An Ed25519 signature.
///
/// Stored as `Vec<u8>` so that an absent signature is simply empty. Any
/// value that is not exactly 64 bytes fails verification, no panics.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KestrelSignature {
    bytes: Vec<u8>,
}

impl KestrelKeypair {
    /// Generate a fresh keypair from the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Construct a keypair deterministically from a 32-byte seed.
    ///
    /// Tests and devnet configs lean on this heavily. A weak seed gives a
    /// weak key.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret key, as written by
    /// `kestrel-node init`.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let arr: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&arr))
    }

    /// Returns the public key associated with this keypair.
    pub fn public_key(&self) -> KestrelPublicKey {
        KestrelPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign arbitrary bytes. Ed25519 signing is deterministic.
    pub fn sign(&self, message: &[u8]) -> KestrelSignature {
        KestrelSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Exports the raw 32-byte secret key material. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Hex encoding of the secret key, the on-disk key file format.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key_bytes())
    }
}

impl Clone for KestrelKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for KestrelKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KestrelKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// KestrelPublicKey
// ---------------------------------------------------------------------------

impl KestrelPublicKey {
    /// Wrap raw bytes without validation. Verification fails later if the
    /// bytes are not a curve point.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Build from a slice, checking length and that the bytes decode to a
    /// valid Ed25519 point.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verify a signature against this public key.
    pub fn verify(&self, message: &[u8], signature: &KestrelSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.bytes.as_slice()) else {
            return false;
        };
        let dalek_sig = DalekSignature::from_bytes(&sig_bytes);
        verifying_key.verify(message, &dalek_sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for KestrelPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KestrelPublicKey({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// KestrelSignature
// ---------------------------------------------------------------------------

impl KestrelSignature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// True when no signature has been attached yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for KestrelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes.is_empty() {
            write!(f, "KestrelSignature(<none>)")
        } else {
            write!(f, "KestrelSignature({}..)", hex::encode(&self.bytes[..8.min(self.bytes.len())]))
        }
    }
}
