//! Account and token addresses.
//!
//! An account address is the holder's Ed25519 public key. Token addresses
//! live in the same 32-byte space: the main token sits at a reserved
//! constant, user tokens at a hash of issuer and shorthand.
//!
//! Addresses render as base58. In human-readable serde formats (TOML,
//! JSON) they are base58 strings; in bincode they are the raw 32 bytes so
//! consensus encodings stay compact.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::hash::domain_separated_hash;
use super::keys::{KeyError, KestrelPublicKey};

/// A 32-byte account or token address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 32]);

/// Address of the chain's native token.
pub const MAIN_TOKEN: Address = Address([0xff; 32]);

impl Address {
    /// Sender of coinbase and genesis-allocation messages. Nobody holds
    /// its key.
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The public key this address verifies signatures against.
    pub fn public_key(&self) -> KestrelPublicKey {
        KestrelPublicKey::from_bytes(self.0)
    }

    /// Address of a user-issued token: derived from issuer and shorthand,
    /// so the same issuer cannot register one shorthand twice.
    pub fn token(issuer: &Address, shorthand: &str) -> Address {
        let mut preimage = Vec::with_capacity(32 + shorthand.len());
        preimage.extend_from_slice(&issuer.0);
        preimage.extend_from_slice(shorthand.as_bytes());
        Address(domain_separated_hash("kestrel token address v1", &preimage))
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl From<KestrelPublicKey> for Address {
    fn from(key: KestrelPublicKey) -> Self {
        Address(*key.as_bytes())
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| KeyError::InvalidAddress(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidAddress(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base58())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            struct Base58Visitor;

            impl<'de> Visitor<'de> for Base58Visitor {
                type Value = Address;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a base58-encoded 32-byte address")
                }

                fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
                    Address::from_str(v).map_err(E::custom)
                }
            }

            deserializer.deserialize_str(Base58Visitor)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Address)
        }
    }
}
