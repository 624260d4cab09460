//! # ChainDb: Block Persistence
//!
//! Every chain index lives in a single sled tree named `chain`, split into
//! one-byte key prefixes. Keeping them in one tree means a block and all of
//! its indexes land in one atomic `Batch`: either everything is on disk or
//! nothing is.
//!
//! | Prefix | Key                 | Value                         |
//! |--------|---------------------|-------------------------------|
//! | `h`    | height (8B BE)      | block hash                    |
//! | `H`    | block hash          | `bincode(Header)`             |
//! | `b`    | block hash          | `bincode(Vec<Message>)`       |
//! | `l`    | message hash        | `bincode((block hash, index))`|
//! | `c`    | cycle (8B BE)       | hash of last block in cycle   |
//! | `f`    | height (8B BE)      | confirmed height at that block|
//! | `r`    | block hash          | `bincode(Roots)` after apply  |
//! | `meta/last_height` | -       | height (8B BE)                |
//!
//! Heights and cycles are big-endian so sled's lexicographic ordering
//! matches numeric ordering and range scans work.
//!
//! The status tries get their own trees through [`ChainDb::open_tree`].

use std::path::Path;

use sled::{Batch, Db, Tree};

use super::block::{Block, Header, Roots};
use crate::crypto::{Hash, ZERO_HASH};
use crate::message::Message;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

const HEIGHT_PREFIX: u8 = b'h';
const HEADER_PREFIX: u8 = b'H';
const BODY_PREFIX: u8 = b'b';
const LOCATION_PREFIX: u8 = b'l';
const CYCLE_PREFIX: u8 = b'c';
const CONFIRMED_PREFIX: u8 = b'f';
const ROOTS_PREFIX: u8 = b'r';
const META_LAST_HEIGHT: &[u8] = b"meta/last_height";

fn key(prefix: u8, suffix: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + suffix.len());
    k.push(prefix);
    k.extend_from_slice(suffix);
    k
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode_u64(bytes: &[u8]) -> DbResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid u64 bytes".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

fn decode_hash(bytes: &[u8]) -> DbResult<Hash> {
    bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid hash bytes".to_string()))
}

// ---------------------------------------------------------------------------
// HeaderReader
// ---------------------------------------------------------------------------

/// Read-only header access, which is all the consensus rules need from
/// storage.
pub trait HeaderReader {
    fn header_by_hash(&self, hash: &Hash) -> DbResult<Option<Header>>;

    /// Canonical block hash at `height`.
    fn hash_at(&self, height: u64) -> DbResult<Option<Hash>>;

    /// Hash of the last canonical block in `cycle`.
    fn cycle_last(&self, cycle: u64) -> DbResult<Option<Hash>>;
}

// ---------------------------------------------------------------------------
// ChainDb
// ---------------------------------------------------------------------------

/// Persistent block store.
///
/// sled is thread-safe, so `ChainDb` can be cloned and shared freely.
/// Writers are serialized by the chain engine's lock, not here.
#[derive(Debug, Clone)]
pub struct ChainDb {
    db: Db,
    chain: Tree,
}

impl ChainDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in memory and is dropped with the handle.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let chain = db.open_tree("chain")?;
        Ok(Self { db, chain })
    }

    /// Open a named sled tree in the same database. Used by the status
    /// tries.
    pub fn open_tree(&self, name: &str) -> DbResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    // -- Writes -------------------------------------------------------------

    /// Persist a block as the new canonical tip, along with the state
    /// roots its application produced and the confirmed height after it.
    pub fn put_block(&self, block: &Block, post_roots: &Roots, confirmed: u64) -> DbResult<()> {
        let header = &block.header;
        let hash = header.hash;
        let height_key = header.height.to_be_bytes();

        let mut batch = Batch::default();
        batch.insert(key(HEIGHT_PREFIX, &height_key), &hash[..]);
        batch.insert(key(HEADER_PREFIX, &hash), encode(header)?);
        batch.insert(key(BODY_PREFIX, &hash), encode(&block.messages)?);
        for (index, msg) in block.messages.iter().enumerate() {
            batch.insert(
                key(LOCATION_PREFIX, &msg.hash),
                encode(&(hash, index as u32))?,
            );
        }
        batch.insert(key(CYCLE_PREFIX, &header.cycle.to_be_bytes()), &hash[..]);
        batch.insert(
            key(CONFIRMED_PREFIX, &height_key),
            &confirmed.to_be_bytes()[..],
        );
        batch.insert(key(ROOTS_PREFIX, &hash), encode(post_roots)?);
        batch.insert(META_LAST_HEIGHT, &height_key[..]);

        self.chain.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Drop every block above `height` from the canonical indexes and make
    /// `height` the tip again. Headers and bodies stay addressable by hash.
    /// Returns the headers that left the canonical chain, highest first.
    pub fn truncate_above(&self, height: u64) -> DbResult<Vec<Header>> {
        let last = self
            .last_height()?
            .ok_or_else(|| DbError::NotFound("empty chain".to_string()))?;
        let target = self
            .header_by_height(height)?
            .ok_or_else(|| DbError::NotFound(format!("header at height {height}")))?;

        let mut removed = Vec::new();
        let mut batch = Batch::default();
        for h in ((height + 1)..=last).rev() {
            let Some(header) = self.header_by_height(h)? else {
                continue;
            };
            let height_key = h.to_be_bytes();
            batch.remove(key(HEIGHT_PREFIX, &height_key));
            batch.remove(key(CONFIRMED_PREFIX, &height_key));
            for msg in self.messages_of(&header.hash)? {
                batch.remove(key(LOCATION_PREFIX, &msg.hash));
            }
            removed.push(header);
        }

        let start = key(CYCLE_PREFIX, &(target.cycle + 1).to_be_bytes());
        let end = key(CYCLE_PREFIX + 1, &[]);
        for entry in self.chain.range(start..end) {
            let (k, _) = entry?;
            batch.remove(k);
        }
        batch.insert(key(CYCLE_PREFIX, &target.cycle.to_be_bytes()), &target.hash[..]);
        batch.insert(META_LAST_HEIGHT, &height.to_be_bytes()[..]);

        self.chain.apply_batch(batch)?;
        self.db.flush()?;
        Ok(removed)
    }

    // -- Reads --------------------------------------------------------------

    pub fn last_height(&self) -> DbResult<Option<u64>> {
        self.chain
            .get(META_LAST_HEIGHT)?
            .map(|b| decode_u64(&b))
            .transpose()
    }

    pub fn last_header(&self) -> DbResult<Option<Header>> {
        match self.last_height()? {
            Some(h) => self.header_by_height(h),
            None => Ok(None),
        }
    }

    pub fn header_by_height(&self, height: u64) -> DbResult<Option<Header>> {
        match self.hash_at(height)? {
            Some(hash) => self.header_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn block_by_hash(&self, hash: &Hash) -> DbResult<Option<Block>> {
        let Some(header) = self.header_by_hash(hash)? else {
            return Ok(None);
        };
        let messages = self.messages_of(hash)?;
        Ok(Some(Block { header, messages }))
    }

    pub fn block_by_height(&self, height: u64) -> DbResult<Option<Block>> {
        match self.hash_at(height)? {
            Some(hash) => self.block_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// A canonical message with the hash of the block that carries it.
    pub fn message(&self, hash: &Hash) -> DbResult<Option<(Message, Hash)>> {
        let Some(loc) = self.chain.get(key(LOCATION_PREFIX, hash))? else {
            return Ok(None);
        };
        let (block_hash, index): (Hash, u32) = decode(&loc)?;
        let messages = self.messages_of(&block_hash)?;
        Ok(messages
            .into_iter()
            .nth(index as usize)
            .map(|m| (m, block_hash)))
    }

    /// Confirmed height as recorded right after the block at `height`.
    pub fn confirmed_at(&self, height: u64) -> DbResult<Option<u64>> {
        self.chain
            .get(key(CONFIRMED_PREFIX, &height.to_be_bytes()))?
            .map(|b| decode_u64(&b))
            .transpose()
    }

    /// Status roots after applying the block `hash`.
    pub fn post_roots(&self, hash: &Hash) -> DbResult<Option<Roots>> {
        self.chain
            .get(key(ROOTS_PREFIX, hash))?
            .map(|b| decode(&b))
            .transpose()
    }

    fn messages_of(&self, hash: &Hash) -> DbResult<Vec<Message>> {
        match self.chain.get(key(BODY_PREFIX, hash))? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl HeaderReader for ChainDb {
    fn header_by_hash(&self, hash: &Hash) -> DbResult<Option<Header>> {
        if *hash == ZERO_HASH {
            return Ok(None);
        }
        self.chain
            .get(key(HEADER_PREFIX, hash))?
            .map(|b| decode(&b))
            .transpose()
    }

    fn hash_at(&self, height: u64) -> DbResult<Option<Hash>> {
        self.chain
            .get(key(HEIGHT_PREFIX, &height.to_be_bytes()))?
            .map(|b| decode_hash(&b))
            .transpose()
    }

    fn cycle_last(&self, cycle: u64) -> DbResult<Option<Hash>> {
        self.chain
            .get(key(CYCLE_PREFIX, &cycle.to_be_bytes()))?
            .map(|b| decode_hash(&b))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
