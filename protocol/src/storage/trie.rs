//! # Versioned Trie Adapter
//!
//! The status layer only needs a small contract from its backing store:
//! read and stage writes, commit to a 32-byte root, and jump back to any
//! earlier root. [`TrieStore`] is that contract; [`SledTrie`] implements
//! it over a dedicated sled tree.
//!
//! ## Layout
//!
//! | Key                 | Value                                   |
//! |---------------------|-----------------------------------------|
//! | `v` + value hash    | raw value bytes (content-addressed)     |
//! | `r` + root          | `bincode(RootRecord)`                   |
//!
//! Values are stored once no matter how many versions reference them. A
//! root record is either a full key → value-hash index or the keys that
//! changed since its parent root. Every [`CHECKPOINT_INTERVAL`] versions a
//! full index is written, so re-pointing at a historical root replays at
//! most that many diffs.
//!
//! ## Root
//!
//! Leaves are `BLAKE3(len(key) || key || value_hash)` in ascending key
//! order, folded with [`merkle_root`]. An empty trie has the zero root.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sled::{Batch, Tree};

use crate::crypto::hash::short_hex;
use crate::crypto::{blake3_hash, blake3_hash_multi, merkle_root, Hash, ZERO_HASH};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown trie root {0}")]
    MissingRoot(String),

    #[error("value {0} referenced by index is missing")]
    MissingValue(String),
}

pub type TrieResult<T> = Result<T, TrieError>;

const VALUE_PREFIX: u8 = b'v';
const ROOT_PREFIX: u8 = b'r';

/// Versions between two full index records.
pub const CHECKPOINT_INTERVAL: u32 = 64;

#[derive(Debug, Serialize, Deserialize)]
enum RootRecord {
    Full(Vec<(Vec<u8>, Hash)>),
    Diff {
        parent: Hash,
        /// Diffs between this root and the nearest full record.
        depth: u32,
        /// `None` marks a deleted key.
        changes: Vec<(Vec<u8>, Option<Hash>)>,
    },
}

// ---------------------------------------------------------------------------
// TrieStore
// ---------------------------------------------------------------------------

/// Key-value storage committed to a Merkle root.
///
/// Writes are staged in memory until [`commit`](TrieStore::commit), which
/// is the only call that mutates storage. [`revert`](TrieStore::revert)
/// drops staged writes.
pub trait TrieStore: Send + Sync {
    fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>>;

    fn update(&mut self, key: &[u8], value: Vec<u8>);

    fn delete(&mut self, key: &[u8]);

    /// Root of the last commit (or of the last `set_root`).
    fn root(&self) -> Hash;

    /// Re-point at a historical root, dropping staged writes.
    fn set_root(&mut self, root: Hash) -> TrieResult<()>;

    fn commit(&mut self) -> TrieResult<Hash>;

    fn revert(&mut self);

    /// All live entries whose key starts with `prefix`, staged writes
    /// included, in ascending key order.
    fn iter_prefix(&self, prefix: &[u8]) -> TrieResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

// ---------------------------------------------------------------------------
// SledTrie
// ---------------------------------------------------------------------------

pub struct SledTrie {
    tree: Tree,
    root: Hash,
    /// Committed key → value hash for the current root.
    index: BTreeMap<Vec<u8>, Hash>,
    /// Staged writes; `None` marks a delete.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Diff records between `root` and its nearest full record.
    depth: u32,
}

impl std::fmt::Debug for SledTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledTrie")
            .field("root", &short_hex(&self.root))
            .field("keys", &self.index.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SledTrie {
    /// Open an empty view over `tree`. Call [`set_root`](TrieStore::set_root)
    /// to resume from a persisted version.
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            root: ZERO_HASH,
            index: BTreeMap::new(),
            pending: BTreeMap::new(),
            depth: 0,
        }
    }

    fn value_key(hash: &Hash) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(VALUE_PREFIX);
        key.extend_from_slice(hash);
        key
    }

    fn root_key(root: &Hash) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(ROOT_PREFIX);
        key.extend_from_slice(root);
        key
    }

    fn load_value(&self, hash: &Hash) -> TrieResult<Vec<u8>> {
        self.tree
            .get(Self::value_key(hash))?
            .map(|v| v.to_vec())
            .ok_or_else(|| TrieError::MissingValue(short_hex(hash)))
    }

    fn load_record(&self, root: &Hash) -> TrieResult<Option<RootRecord>> {
        match self.tree.get(Self::root_key(root))? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| TrieError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Rebuild the index committed at `root` and its diff depth.
    fn load_index(&self, root: Hash) -> TrieResult<(BTreeMap<Vec<u8>, Hash>, u32)> {
        let mut diffs = Vec::new();
        let mut cursor = root;
        let mut index = loop {
            if cursor == ZERO_HASH {
                break BTreeMap::new();
            }
            match self.load_record(&cursor)? {
                Some(RootRecord::Full(entries)) => break entries.into_iter().collect(),
                Some(RootRecord::Diff {
                    parent, changes, ..
                }) => {
                    diffs.push(changes);
                    cursor = parent;
                }
                None => return Err(TrieError::MissingRoot(short_hex(&cursor))),
            }
        };

        let depth = diffs.len() as u32;
        for changes in diffs.into_iter().rev() {
            for (key, hash) in changes {
                match hash {
                    Some(hash) => index.insert(key, hash),
                    None => index.remove(&key),
                };
            }
        }
        Ok((index, depth))
    }

    /// Depth recorded for an already-committed root.
    fn depth_of(&self, root: &Hash) -> TrieResult<u32> {
        Ok(match self.load_record(root)? {
            Some(RootRecord::Diff { depth, .. }) => depth,
            _ => 0,
        })
    }

    fn compute_root(index: &BTreeMap<Vec<u8>, Hash>) -> Hash {
        let leaves: Vec<Hash> = index
            .iter()
            .map(|(key, value_hash)| {
                blake3_hash_multi(&[&(key.len() as u32).to_le_bytes()[..], &key[..], &value_hash[..]])
            })
            .collect();
        merkle_root(&leaves)
    }
}

impl TrieStore for SledTrie {
    fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.get(key) {
            return Ok(staged.clone());
        }
        match self.index.get(key) {
            Some(hash) => self.load_value(hash).map(Some),
            None => Ok(None),
        }
    }

    fn update(&mut self, key: &[u8], value: Vec<u8>) {
        self.pending.insert(key.to_vec(), Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.pending.insert(key.to_vec(), None);
    }

    fn root(&self) -> Hash {
        self.root
    }

    fn set_root(&mut self, root: Hash) -> TrieResult<()> {
        let (index, depth) = self.load_index(root)?;
        self.index = index;
        self.root = root;
        self.depth = depth;
        self.pending.clear();
        Ok(())
    }

    fn commit(&mut self) -> TrieResult<Hash> {
        if self.pending.is_empty() {
            return Ok(self.root);
        }

        let mut index = self.index.clone();
        let mut changes = Vec::with_capacity(self.pending.len());
        let mut batch = Batch::default();
        for (key, staged) in &self.pending {
            match staged {
                Some(value) => {
                    let value_hash = blake3_hash(value);
                    batch.insert(Self::value_key(&value_hash), value.as_slice());
                    index.insert(key.clone(), value_hash);
                    changes.push((key.clone(), Some(value_hash)));
                }
                None => {
                    index.remove(key);
                    changes.push((key.clone(), None));
                }
            }
        }

        let root = Self::compute_root(&index);
        let depth = if root == ZERO_HASH {
            0
        } else if self.tree.contains_key(Self::root_key(&root))? {
            // Same content as an earlier version; its record stays.
            self.depth_of(&root)?
        } else {
            let (record, depth) = if self.depth + 1 >= CHECKPOINT_INTERVAL {
                (RootRecord::Full(index.iter().map(|(k, h)| (k.clone(), *h)).collect()), 0)
            } else {
                let depth = self.depth + 1;
                let record = RootRecord::Diff {
                    parent: self.root,
                    depth,
                    changes,
                };
                (record, depth)
            };
            let bytes = bincode::serialize(&record)
                .map_err(|e| TrieError::Serialization(e.to_string()))?;
            batch.insert(Self::root_key(&root), bytes);
            depth
        };
        self.tree.apply_batch(batch)?;

        self.index = index;
        self.root = root;
        self.depth = depth;
        self.pending.clear();
        Ok(root)
    }

    fn revert(&mut self) {
        self.pending.clear();
    }

    fn iter_prefix(&self, prefix: &[u8]) -> TrieResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        for (key, hash) in self
            .index
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            merged.insert(key.clone(), Some(self.load_value(hash)?));
        }
        for (key, staged) in self
            .pending
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            merged.insert(key.clone(), staged.clone());
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
