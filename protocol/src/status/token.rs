//! Token registry and main-token circulation.
//!
//! `t/` + token address holds a `TokenRecord`; `circulation` holds the
//! main-token supply minted so far, genesis allocation included.

use serde::{Deserialize, Serialize};

use super::{decode, decode_u64, encode, StatusError, StatusResult};
use crate::crypto::{Address, Hash};
use crate::storage::TrieStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub height: u64,
    pub amount: u64,
    pub message: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub address: Address,
    pub issuer: Address,
    pub name: String,
    pub shorthand: String,
    pub increase_allowed: bool,
    pub issuances: Vec<Issuance>,
}

impl TokenRecord {
    pub fn total_supply(&self) -> u64 {
        self.issuances
            .iter()
            .fold(0u64, |acc, i| acc.saturating_add(i.amount))
    }
}

const TOKEN_PREFIX: &[u8] = b"t/";
const CIRCULATION_KEY: &[u8] = b"circulation";

fn token_key(address: &Address) -> Vec<u8> {
    [TOKEN_PREFIX, address.as_bytes()].concat()
}

pub struct TokenStatus {
    trie: Box<dyn TrieStore>,
}

impl TokenStatus {
    pub fn new(trie: Box<dyn TrieStore>) -> Self {
        Self { trie }
    }

    pub fn token(&self, address: &Address) -> StatusResult<Option<TokenRecord>> {
        self.trie
            .get(&token_key(address))?
            .map(|b| decode(&b))
            .transpose()
    }

    pub fn tokens(&self) -> StatusResult<Vec<TokenRecord>> {
        self.trie
            .iter_prefix(TOKEN_PREFIX)?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    /// Whether `issuer` may issue `amount` more of the token at `address`.
    pub fn check_issue(&self, address: &Address, issuer: &Address, amount: u64) -> StatusResult<()> {
        let Some(existing) = self.token(address)? else {
            return Ok(());
        };
        if existing.issuer != *issuer {
            return Err(StatusError::NotIssuer {
                token: *address,
                issuer: existing.issuer,
            });
        }
        if !existing.increase_allowed {
            return Err(StatusError::SupplyFixed(*address));
        }
        existing
            .total_supply()
            .checked_add(amount)
            .map(|_| ())
            .ok_or(StatusError::Overflow("token supply"))
    }

    /// Create `record`, or append its issuance to an existing record.
    pub fn issue(&mut self, record: TokenRecord) -> StatusResult<()> {
        let amount = record.total_supply();
        self.check_issue(&record.address, &record.issuer, amount)?;
        let merged = match self.token(&record.address)? {
            Some(mut existing) => {
                existing.issuances.extend(record.issuances);
                existing
            }
            None => record,
        };
        let bytes = encode(&merged)?;
        self.trie.update(&token_key(&merged.address), bytes);
        Ok(())
    }

    pub fn circulation(&self) -> StatusResult<u64> {
        match self.trie.get(CIRCULATION_KEY)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    pub fn set_circulation(&mut self, amount: u64) {
        self.trie
            .update(CIRCULATION_KEY, amount.to_be_bytes().to_vec());
    }

    pub fn root(&self) -> Hash {
        self.trie.root()
    }

    pub fn commit(&mut self) -> StatusResult<Hash> {
        Ok(self.trie.commit()?)
    }

    pub fn revert(&mut self) {
        self.trie.revert();
    }

    pub fn set_root(&mut self, root: Hash) -> StatusResult<()> {
        Ok(self.trie.set_root(root)?)
    }
}
