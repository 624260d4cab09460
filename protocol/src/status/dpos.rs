//! # DPoS Status
//!
//! Candidate registry, voter edges, elected supers and mint counters.
//!
//! | Key                           | Value                   |
//! |-------------------------------|-------------------------|
//! | `c/` + signer                 | `bincode(CandidateRecord)` |
//! | `v/` + voter                  | target address (32B)    |
//! | `s/` + cycle (BE)             | `bincode(Supers)`       |
//! | `m/` + cycle (BE) + signer    | mint count, u64 BE      |
//! | `confirmed`                   | confirmed height, u64 BE|
//!
//! A voter has one edge; a new vote overwrites the old one.

use serde::{Deserialize, Serialize};

use super::{decode, decode_u64, encode, StatusError, StatusResult};
use crate::crypto::{Address, Hash};
use crate::storage::TrieStore;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub signer: Address,
    pub peer_id: String,
    /// Height of the block that registered the candidate.
    pub registered_at: u64,
}

/// An elected producer with the weight it was elected on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub signer: Address,
    pub peer_id: String,
    pub weight: u64,
}

/// The ordered producer list of one cycle and the seed it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supers {
    pub cycle: u64,
    /// Hash of the last block before `cycle`.
    pub pre_hash: Hash,
    pub members: Vec<Member>,
}

impl Supers {
    pub fn contains(&self, signer: &Address) -> bool {
        self.members.iter().any(|m| &m.signer == signer)
    }
}

// ---------------------------------------------------------------------------
// DposStatus
// ---------------------------------------------------------------------------

const CANDIDATE_PREFIX: &[u8] = b"c/";
const VOTE_PREFIX: &[u8] = b"v/";
const SUPERS_PREFIX: &[u8] = b"s/";
const MINT_PREFIX: &[u8] = b"m/";
const CONFIRMED_KEY: &[u8] = b"confirmed";

fn candidate_key(signer: &Address) -> Vec<u8> {
    [CANDIDATE_PREFIX, signer.as_bytes()].concat()
}

fn vote_key(voter: &Address) -> Vec<u8> {
    [VOTE_PREFIX, voter.as_bytes()].concat()
}

fn supers_key(cycle: u64) -> Vec<u8> {
    [SUPERS_PREFIX, &cycle.to_be_bytes()].concat()
}

fn mint_key(cycle: u64, signer: &Address) -> Vec<u8> {
    [MINT_PREFIX, &cycle.to_be_bytes(), signer.as_bytes()].concat()
}

fn address_suffix(key: &[u8], prefix: &[u8]) -> StatusResult<Address> {
    key.get(prefix.len()..)
        .and_then(|s| <[u8; 32]>::try_from(s).ok())
        .map(Address)
        .ok_or_else(|| StatusError::Serialization(format!("bad key length {}", key.len())))
}

pub struct DposStatus {
    trie: Box<dyn TrieStore>,
}

impl DposStatus {
    pub fn new(trie: Box<dyn TrieStore>) -> Self {
        Self { trie }
    }

    // -- Candidates ---------------------------------------------------------

    pub fn candidate(&self, signer: &Address) -> StatusResult<Option<CandidateRecord>> {
        self.trie
            .get(&candidate_key(signer))?
            .map(|b| decode(&b))
            .transpose()
    }

    /// All registered candidates in address order.
    pub fn candidates(&self) -> StatusResult<Vec<CandidateRecord>> {
        self.trie
            .iter_prefix(CANDIDATE_PREFIX)?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    /// Register `signer`, or update its peer id if already registered.
    pub fn register(&mut self, signer: &Address, peer_id: &str, height: u64) -> StatusResult<()> {
        let record = match self.candidate(signer)? {
            Some(mut existing) => {
                existing.peer_id = peer_id.to_string();
                existing
            }
            None => CandidateRecord {
                signer: *signer,
                peer_id: peer_id.to_string(),
                registered_at: height,
            },
        };
        let bytes = encode(&record)?;
        self.trie.update(&candidate_key(signer), bytes);
        Ok(())
    }

    pub fn cancel(&mut self, signer: &Address) -> StatusResult<()> {
        if self.candidate(signer)?.is_none() {
            return Err(StatusError::UnknownCandidate(*signer));
        }
        self.trie.delete(&candidate_key(signer));
        Ok(())
    }

    // -- Votes --------------------------------------------------------------

    pub fn vote_of(&self, voter: &Address) -> StatusResult<Option<Address>> {
        match self.trie.get(&vote_key(voter))? {
            Some(bytes) => {
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StatusError::Serialization("bad vote target".into()))?;
                Ok(Some(Address(arr)))
            }
            None => Ok(None),
        }
    }

    pub fn set_vote(&mut self, voter: &Address, target: &Address) {
        self.trie
            .update(&vote_key(voter), target.as_bytes().to_vec());
    }

    /// Every `(voter, target)` edge in voter order.
    pub fn votes(&self) -> StatusResult<Vec<(Address, Address)>> {
        self.trie
            .iter_prefix(VOTE_PREFIX)?
            .iter()
            .map(|(k, v)| {
                let voter = address_suffix(k, VOTE_PREFIX)?;
                let target = <[u8; 32]>::try_from(v.as_slice())
                    .map(Address)
                    .map_err(|_| StatusError::Serialization("bad vote target".into()))?;
                Ok((voter, target))
            })
            .collect()
    }

    // -- Supers -------------------------------------------------------------

    pub fn supers(&self, cycle: u64) -> StatusResult<Option<Supers>> {
        self.trie
            .get(&supers_key(cycle))?
            .map(|b| decode(&b))
            .transpose()
    }

    pub fn set_supers(&mut self, supers: &Supers) -> StatusResult<()> {
        let bytes = encode(supers)?;
        self.trie.update(&supers_key(supers.cycle), bytes);
        Ok(())
    }

    // -- Counters -----------------------------------------------------------

    pub fn mint_count(&self, cycle: u64, signer: &Address) -> StatusResult<u64> {
        match self.trie.get(&mint_key(cycle, signer))? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    pub fn add_mint(&mut self, cycle: u64, signer: &Address) -> StatusResult<()> {
        let count = self.mint_count(cycle, signer)?.saturating_add(1);
        self.trie
            .update(&mint_key(cycle, signer), count.to_be_bytes().to_vec());
        Ok(())
    }

    pub fn confirmed(&self) -> StatusResult<u64> {
        match self.trie.get(CONFIRMED_KEY)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    pub fn set_confirmed(&mut self, height: u64) {
        self.trie
            .update(CONFIRMED_KEY, height.to_be_bytes().to_vec());
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
