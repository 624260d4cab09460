//! Two-queue message pool.
//!
//! Pending messages wait in one of two queues until a block includes them:
//!
//! - **Ready**: the sender's next nonce (`current + 1`). Ordered by fee
//!   descending in a B-tree, so block assembly walks it front to back.
//! - **Cache**: a later nonce, held until the gap closes.
//!
//! Each queue keeps at most one message per sender. Everything sits
//! behind one `parking_lot::RwLock`; the chain callbacks ([`ChainView`])
//! are always invoked before that lock is taken.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::AppliedSink;
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, Hash};
use crate::message::{verify_message, Message, MessageError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Local pool limits. Not consensus-critical; nodes may differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of messages across both queues.
    pub max_size: usize,

    /// Seconds after which a message is dropped by [`Mempool::expire_old`].
    pub expiry_seconds: u64,

    /// Minimum fee accepted at admission.
    pub min_fee: u64,

    /// Largest encoded message accepted at admission.
    pub max_message_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            expiry_seconds: 3600,
            min_fee: 0,
            max_message_bytes: 64 * 1024,
        }
    }
}

/// Read-only chain state the pool needs.
pub trait ChainView {
    /// Current nonce of `address`, or `None` if it cannot be read.
    fn nonce(&self, address: &Address) -> Option<u64>;
    fn height(&self) -> u64;
}

// ---------------------------------------------------------------------------
// FeeKey
// ---------------------------------------------------------------------------

/// Ready-queue ordering: fee descending, then admission order, then hash.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FeeKey {
    /// `u64::MAX - fee`, so ascending iteration is highest fee first.
    inverted_fee: u64,
    seq: u64,
    hash: Hash,
}

impl FeeKey {
    fn of(entry: &MempoolEntry) -> Self {
        Self {
            inverted_fee: u64::MAX - entry.message.fee,
            seq: entry.seq,
            hash: entry.message.hash,
        }
    }
}

impl Ord for FeeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inverted_fee
            .cmp(&other.inverted_fee)
            .then_with(|| self.seq.cmp(&other.seq))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for FeeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Which queue a message sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Ready,
    Cache,
}

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub message: Message,
    /// Admission time, seconds since the UNIX epoch.
    pub added_at: u64,
    pub queue: Queue,
    seq: u64,
}

// ---------------------------------------------------------------------------
// MempoolError
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
pub enum MempoolError {
    /// A message with the same hash is already pooled.
    Duplicate,

    FeeTooLow { min: u64, got: u64 },

    TooLarge { size: usize, max: usize },

    /// Coinbase messages are only synthesized by producers.
    Coinbase,

    Invalid(MessageError),

    /// The sender's nonce could not be read.
    NonceUnavailable,

    /// The nonce has already been used.
    StaleNonce { current: u64, got: u64 },

    /// The sender already has a message in the target queue that the new
    /// one does not replace.
    NotReplaced { nonce: u64, fee: u64 },

    /// The pool is full and the message does not outbid the cheapest ready
    /// entry.
    Full { size: usize },
}

impl fmt::Display for MempoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => write!(f, "message already in mempool"),
            Self::FeeTooLow { min, got } => write!(f, "fee too low: minimum {}, got {}", min, got),
            Self::TooLarge { size, max } => {
                write!(f, "message is {} bytes, limit is {}", size, max)
            }
            Self::Coinbase => write!(f, "coinbase messages cannot be submitted"),
            Self::Invalid(e) => write!(f, "invalid message: {}", e),
            Self::NonceUnavailable => write!(f, "sender nonce is unavailable"),
            Self::StaleNonce { current, got } => {
                write!(f, "nonce {} already used (current {})", got, current)
            }
            Self::NotReplaced { nonce, fee } => write!(
                f,
                "sender already has a pending message (nonce {}, fee {})",
                nonce, fee
            ),
            Self::Full { size } => write!(f, "mempool is full ({} messages)", size),
        }
    }
}

impl std::error::Error for MempoolError {}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Pool {
    entries: HashMap<Hash, MempoolEntry>,
    ready: BTreeMap<FeeKey, Hash>,
    ready_by_sender: HashMap<Address, Hash>,
    cache_by_sender: HashMap<Address, Hash>,
    /// Chain height at the last `update`.
    synced_height: Option<u64>,
    next_seq: u64,
}

impl Pool {
    fn remove(&mut self, hash: &Hash) -> Option<MempoolEntry> {
        let entry = self.entries.remove(hash)?;
        let sender = entry.message.from;
        match entry.queue {
            Queue::Ready => {
                self.ready.remove(&FeeKey::of(&entry));
                if self.ready_by_sender.get(&sender) == Some(hash) {
                    self.ready_by_sender.remove(&sender);
                }
            }
            Queue::Cache => {
                if self.cache_by_sender.get(&sender) == Some(hash) {
                    self.cache_by_sender.remove(&sender);
                }
            }
        }
        Some(entry)
    }

    fn insert(&mut self, entry: MempoolEntry) {
        let hash = entry.message.hash;
        let sender = entry.message.from;
        match entry.queue {
            Queue::Ready => {
                self.ready.insert(FeeKey::of(&entry), hash);
                self.ready_by_sender.insert(sender, hash);
            }
            Queue::Cache => {
                self.cache_by_sender.insert(sender, hash);
            }
        }
        self.entries.insert(hash, entry);
    }

    fn sender_slot(&self, sender: &Address, queue: Queue) -> Option<&MempoolEntry> {
        let index = match queue {
            Queue::Ready => &self.ready_by_sender,
            Queue::Cache => &self.cache_by_sender,
        };
        index.get(sender).and_then(|h| self.entries.get(h))
    }

    /// Drop the cheapest ready message if `fee` beats it.
    fn evict_lowest(&mut self, fee: u64) -> bool {
        let Some((key, hash)) = self.ready.iter().next_back() else {
            return false;
        };
        if fee <= u64::MAX - key.inverted_fee {
            return false;
        }
        let hash = *hash;
        self.remove(&hash).is_some()
    }
}

/// Thread-safe two-queue pool.
pub struct Mempool {
    inner: RwLock<Pool>,
    config: MempoolConfig,
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.inner.read();
        f.debug_struct("Mempool")
            .field("ready", &pool.ready.len())
            .field("cache", &pool.cache_by_sender.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            inner: RwLock::new(Pool::default()),
            config,
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Admit `msg`. See [`put_at`](Self::put_at).
    pub fn put(&self, msg: Message, view: &dyn ChainView) -> Result<Queue, MempoolError> {
        self.put_at(msg, view, current_timestamp_secs())
    }

    /// Admit `msg` at time `now`.
    ///
    /// 1. **Duplicate** by hash.
    /// 2. **Minimum fee** and **size**.
    /// 3. **Structure**: coinbase rejected, then [`verify_message`].
    /// 4. **Nonce** must exceed the sender's current nonce.
    /// 5. **Sender slot**: a message already queued for the sender is
    ///    replaced only by the same nonce at a higher fee, or (Ready) a
    ///    greater nonce, or (Cache) a lower nonce.
    /// 6. **Capacity**: when full, the cheapest ready message is evicted
    ///    only for a strictly higher fee.
    ///
    /// Routed to Ready when the nonce is exactly `current + 1`, else to
    /// Cache.
    pub fn put_at(&self, msg: Message, view: &dyn ChainView, now: u64) -> Result<Queue, MempoolError> {
        if self.contains(&msg.hash) {
            return Err(MempoolError::Duplicate);
        }
        if msg.fee < self.config.min_fee {
            return Err(MempoolError::FeeTooLow {
                min: self.config.min_fee,
                got: msg.fee,
            });
        }
        let size = msg.size_bytes();
        if size > self.config.max_message_bytes {
            return Err(MempoolError::TooLarge {
                size,
                max: self.config.max_message_bytes,
            });
        }
        if msg.is_coinbase() {
            return Err(MempoolError::Coinbase);
        }
        verify_message(&msg).map_err(MempoolError::Invalid)?;

        let current = view.nonce(&msg.from).ok_or(MempoolError::NonceUnavailable)?;
        if msg.nonce <= current {
            return Err(MempoolError::StaleNonce {
                current,
                got: msg.nonce,
            });
        }
        let queue = if msg.nonce == current + 1 {
            Queue::Ready
        } else {
            Queue::Cache
        };

        let mut pool = self.inner.write();
        if pool.entries.contains_key(&msg.hash) {
            return Err(MempoolError::Duplicate);
        }

        let existing = pool
            .sender_slot(&msg.from, queue)
            .map(|e| (e.message.nonce, e.message.fee, e.message.hash));
        if let Some((nonce, fee, old)) = existing {
            let same_nonce_higher_fee = msg.nonce == nonce && msg.fee > fee;
            let replaces = match queue {
                Queue::Ready => same_nonce_higher_fee || msg.nonce > nonce,
                Queue::Cache => same_nonce_higher_fee || msg.nonce < nonce,
            };
            if !replaces {
                return Err(MempoolError::NotReplaced { nonce, fee });
            }
            pool.remove(&old);
            debug!(old = %short_hex(&old), new = %short_hex(&msg.hash), "replaced pending message");
        }

        if pool.entries.len() >= self.config.max_size && !pool.evict_lowest(msg.fee) {
            return Err(MempoolError::Full {
                size: self.config.max_size,
            });
        }

        let seq = pool.next_seq;
        pool.next_seq += 1;
        pool.insert(MempoolEntry {
            message: msg,
            added_at: now,
            queue,
            seq,
        });
        Ok(queue)
    }

    /// Re-sort the queues after the chain moved. Does nothing if the
    /// height is the one seen at the last call.
    ///
    /// Ready messages that are no longer the sender's next nonce are
    /// dropped, as are cached messages at or below the current nonce.
    /// Cached messages that became the next nonce move to Ready.
    pub fn update(&self, view: &dyn ChainView) {
        let height = view.height();
        let senders: HashSet<Address> = {
            let pool = self.inner.read();
            if pool.synced_height == Some(height) {
                return;
            }
            pool.ready_by_sender
                .keys()
                .chain(pool.cache_by_sender.keys())
                .copied()
                .collect()
        };
        let nonces: Vec<(Address, Option<u64>)> =
            senders.into_iter().map(|a| (a, view.nonce(&a))).collect();

        let mut pool = self.inner.write();
        pool.synced_height = Some(height);
        let (mut dropped, mut promoted) = (0usize, 0usize);

        for (sender, current) in nonces {
            let Some(current) = current else {
                continue;
            };
            let next = current + 1;

            if let Some(hash) = pool.ready_by_sender.get(&sender).copied() {
                let stale = pool
                    .entries
                    .get(&hash)
                    .map_or(true, |e| e.message.nonce != next);
                if stale {
                    pool.remove(&hash);
                    dropped += 1;
                }
            }

            let Some(hash) = pool.cache_by_sender.get(&sender).copied() else {
                continue;
            };
            let Some(nonce) = pool.entries.get(&hash).map(|e| e.message.nonce) else {
                continue;
            };
            if nonce < next {
                pool.remove(&hash);
                dropped += 1;
            } else if nonce == next {
                let Some(mut entry) = pool.remove(&hash) else {
                    continue;
                };
                let ready = pool
                    .sender_slot(&sender, Queue::Ready)
                    .map(|e| (e.message.fee, e.message.hash));
                if let Some((fee, ready)) = ready {
                    if fee >= entry.message.fee {
                        dropped += 1;
                        continue;
                    }
                    pool.remove(&ready);
                    dropped += 1;
                }
                entry.queue = Queue::Ready;
                pool.insert(entry);
                promoted += 1;
            }
        }

        if dropped > 0 || promoted > 0 {
            debug!(height, dropped, promoted, "mempool updated");
        }
    }

    /// Messages for the next block: Ready in fee order, greedily packed
    /// into `max_bytes`. The pool is not changed.
    pub fn need_packaged(&self, max_bytes: usize) -> Vec<Message> {
        let pool = self.inner.read();
        let mut out = Vec::new();
        let mut used = 0usize;
        for hash in pool.ready.values() {
            let Some(entry) = pool.entries.get(hash) else {
                continue;
            };
            let size = entry.message.size_bytes();
            if used.saturating_add(size) > max_bytes {
                continue;
            }
            used += size;
            out.push(entry.message.clone());
        }
        out
    }

    /// Drop messages older than `expiry_seconds`. Returns how many.
    pub fn expire_old(&self) -> usize {
        self.expire_at(current_timestamp_secs())
    }

    pub fn expire_at(&self, now: u64) -> usize {
        let mut pool = self.inner.write();
        let expired: Vec<Hash> = pool
            .entries
            .values()
            .filter(|e| now.saturating_sub(e.added_at) > self.config.expiry_seconds)
            .map(|e| e.message.hash)
            .collect();
        for hash in &expired {
            pool.remove(hash);
        }
        expired.len()
    }

    /// Remove messages included in a block, plus anything pooled for the
    /// same senders at or below the included nonces.
    pub fn delete_applied(&self, messages: &[Message]) {
        let mut pool = self.inner.write();
        for msg in messages {
            pool.remove(&msg.hash);
            for queue in [Queue::Ready, Queue::Cache] {
                let stale = pool
                    .sender_slot(&msg.from, queue)
                    .filter(|e| e.message.nonce <= msg.nonce)
                    .map(|e| e.message.hash);
                if let Some(hash) = stale {
                    pool.remove(&hash);
                }
            }
        }
    }

    pub fn get(&self, hash: &Hash) -> Option<Message> {
        self.inner.read().entries.get(hash).map(|e| e.message.clone())
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().entries.contains_key(hash)
    }

    /// Queue a pooled message sits in.
    pub fn queue_of(&self, hash: &Hash) -> Option<Queue> {
        self.inner.read().entries.get(hash).map(|e| e.queue)
    }

    pub fn pending_for_sender(&self, sender: &Address) -> Vec<Message> {
        let pool = self.inner.read();
        [Queue::Ready, Queue::Cache]
            .into_iter()
            .filter_map(|q| pool.sender_slot(sender, q))
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn ready_len(&self) -> usize {
        self.inner.read().ready.len()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.read().cache_by_sender.len()
    }

    pub fn clear(&self) {
        *self.inner.write() = Pool::default();
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

impl AppliedSink for Mempool {
    fn delete_applied(&self, messages: &[Message]) {
        Mempool::delete_applied(self, messages);
    }
}

fn current_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KestrelKeypair, MAIN_TOKEN};
    use crate::message::MessageBuilder;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct View {
        nonces: Mutex<HashMap<Address, u64>>,
        height: AtomicU64,
    }

    impl View {
        /// Advance one block in which `sender` used `nonce`.
        fn apply(&self, sender: Address, nonce: u64) {
            self.nonces.lock().insert(sender, nonce);
            self.height.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ChainView for View {
        fn nonce(&self, address: &Address) -> Option<u64> {
            Some(self.nonces.lock().get(address).copied().unwrap_or(0))
        }
        fn height(&self) -> u64 {
            self.height.load(Ordering::SeqCst)
        }
    }

    fn kp(seed: u8) -> KestrelKeypair {
        KestrelKeypair::from_seed(&[seed; 32])
    }

    fn addr(seed: u8) -> Address {
        Address::from(kp(seed).public_key())
    }

    fn msg(seed: u8, nonce: u64, fee: u64) -> Message {
        MessageBuilder::transfer(Address([0xAA; 32]), MAIN_TOKEN, 1)
            .nonce(nonce)
            .fee(fee)
            .sign(&kp(seed))
    }

    #[test]
    fn routes_by_nonce() {
        let pool = Mempool::default();
        let view = View::default();
        assert_eq!(pool.put(msg(1, 1, 10), &view).unwrap(), Queue::Ready);
        assert_eq!(pool.put(msg(2, 3, 10), &view).unwrap(), Queue::Cache);
        assert_eq!(pool.ready_len(), 1);
        assert_eq!(pool.cache_len(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn rejects_duplicates_and_used_nonces() {
        let pool = Mempool::default();
        let view = View::default();
        let m = msg(1, 1, 10);
        pool.put(m.clone(), &view).unwrap();
        assert_eq!(pool.put(m, &view), Err(MempoolError::Duplicate));

        view.apply(addr(2), 4);
        assert_eq!(
            pool.put(msg(2, 4, 10), &view),
            Err(MempoolError::StaleNonce { current: 4, got: 4 })
        );
    }

    #[test]
    fn rejects_low_fee_coinbase_and_unsigned() {
        let pool = Mempool::new(MempoolConfig {
            min_fee: 5,
            ..MempoolConfig::default()
        });
        let view = View::default();
        assert_eq!(
            pool.put(msg(1, 1, 4), &view),
            Err(MempoolError::FeeTooLow { min: 5, got: 4 })
        );
        let coinbase = MessageBuilder::coinbase(addr(1), 100, 1, 0);
        let coinbase = Message {
            fee: 5,
            ..coinbase
        };
        assert_eq!(pool.put(coinbase, &view), Err(MempoolError::Coinbase));

        let unsigned = MessageBuilder::transfer(addr(2), MAIN_TOKEN, 1)
            .nonce(1)
            .fee(5)
            .build_unsigned(addr(1));
        assert!(matches!(
            pool.put(unsigned, &view),
            Err(MempoolError::Invalid(MessageError::MissingSignature))
        ));
    }

    #[test]
    fn ready_slot_replacement_rules() {
        let pool = Mempool::default();
        let view = View::default();
        let low = msg(1, 1, 10);
        pool.put(low.clone(), &view).unwrap();

        assert_eq!(
            pool.put(msg(1, 1, 10), &view),
            Err(MempoolError::Duplicate)
        );
        let cheaper = MessageBuilder::vote(addr(3)).nonce(1).fee(9).sign(&kp(1));
        assert_eq!(
            pool.put(cheaper, &view),
            Err(MempoolError::NotReplaced { nonce: 1, fee: 10 })
        );

        let higher = msg(1, 1, 20);
        pool.put(higher.clone(), &view).unwrap();
        assert!(!pool.contains(&low.hash));
        assert!(pool.contains(&higher.hash));
        assert_eq!(pool.ready_len(), 1);
    }

    #[test]
    fn cache_slot_prefers_lower_nonce() {
        let pool = Mempool::default();
        let view = View::default();
        let far = msg(1, 5, 10);
        pool.put(far.clone(), &view).unwrap();

        let nearer = msg(1, 3, 1);
        pool.put(nearer.clone(), &view).unwrap();
        assert!(!pool.contains(&far.hash));
        assert_eq!(pool.queue_of(&nearer.hash), Some(Queue::Cache));

        assert_eq!(
            pool.put(msg(1, 4, 100), &view),
            Err(MempoolError::NotReplaced { nonce: 3, fee: 1 })
        );
    }

    #[test]
    fn full_pool_evicts_only_for_higher_fee() {
        let pool = Mempool::new(MempoolConfig {
            max_size: 2,
            ..MempoolConfig::default()
        });
        let view = View::default();
        pool.put(msg(1, 1, 10), &view).unwrap();
        let cheapest = msg(2, 1, 5);
        pool.put(cheapest.clone(), &view).unwrap();

        assert_eq!(pool.put(msg(3, 1, 5), &view), Err(MempoolError::Full { size: 2 }));
        pool.put(msg(3, 1, 6), &view).unwrap();
        assert!(!pool.contains(&cheapest.hash));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn need_packaged_is_fee_ordered_and_read_only() {
        let pool = Mempool::default();
        let view = View::default();
        for (seed, fee) in [(1, 30), (2, 50), (3, 10), (4, 50)] {
            pool.put(msg(seed, 1, fee), &view).unwrap();
        }
        pool.put(msg(5, 2, 99), &view).unwrap();

        let batch = pool.need_packaged(usize::MAX);
        let fees: Vec<u64> = batch.iter().map(|m| m.fee).collect();
        assert_eq!(fees, vec![50, 50, 30, 10]);
        // Equal fees keep admission order.
        assert_eq!(batch[0].from, addr(2));
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn need_packaged_respects_byte_budget() {
        let pool = Mempool::default();
        let view = View::default();
        for seed in 1..=4 {
            pool.put(msg(seed, 1, seed as u64), &view).unwrap();
        }
        let one = msg(9, 1, 1).size_bytes();
        let batch = pool.need_packaged(one * 2 + one / 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].fee, 4);
        assert!(pool.need_packaged(one - 1).is_empty());
    }

    #[test]
    fn cached_message_promotes_after_gap_closes() {
        let pool = Mempool::default();
        let view = View::default();
        let first = msg(1, 1, 10);
        let second = msg(1, 2, 10);
        pool.put(first.clone(), &view).unwrap();
        pool.put(second.clone(), &view).unwrap();
        assert_eq!(pool.queue_of(&second.hash), Some(Queue::Cache));

        // Same height: nothing moves.
        pool.update(&view);
        assert_eq!(pool.queue_of(&second.hash), Some(Queue::Cache));

        view.apply(addr(1), 1);
        pool.delete_applied(&[first.clone()]);
        pool.update(&view);
        assert!(!pool.contains(&first.hash));
        assert_eq!(pool.queue_of(&second.hash), Some(Queue::Ready));
        assert_eq!(pool.need_packaged(usize::MAX), vec![second]);
    }

    #[test]
    fn update_drops_what_the_chain_used() {
        let pool = Mempool::default();
        let view = View::default();
        let ready = msg(1, 1, 10);
        let cached = msg(1, 3, 10);
        pool.put(ready.clone(), &view).unwrap();
        pool.put(cached.clone(), &view).unwrap();

        // Nonces 1..=3 were used elsewhere.
        view.apply(addr(1), 3);
        pool.update(&view);
        assert!(pool.is_empty());
    }

    #[test]
    fn delete_applied_clears_older_nonces() {
        let pool = Mempool::default();
        let view = View::default();
        let pending = msg(1, 1, 10);
        pool.put(pending.clone(), &view).unwrap();
        let included = MessageBuilder::vote(addr(3)).nonce(1).fee(1).sign(&kp(1));
        pool.delete_applied(&[included]);
        assert!(!pool.contains(&pending.hash));
    }

    #[test]
    fn expiry_uses_admission_time() {
        let pool = Mempool::new(MempoolConfig {
            expiry_seconds: 100,
            ..MempoolConfig::default()
        });
        let view = View::default();
        pool.put_at(msg(1, 1, 10), &view, 1_000).unwrap();
        pool.put_at(msg(2, 1, 10), &view, 1_050).unwrap();
        assert_eq!(pool.expire_at(1_100), 0);
        assert_eq!(pool.expire_at(1_101), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.expire_at(2_000), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn concurrent_admission_and_eviction() {
        let pool = Mempool::default();
        let view = View::default();
        let messages: Vec<Message> = (1..=40u8).map(|s| msg(s, 1, s as u64)).collect();

        std::thread::scope(|scope| {
            for chunk in messages.chunks(10) {
                let pool = &pool;
                let view = &view;
                scope.spawn(move || {
                    for m in chunk {
                        pool.put(m.clone(), view).unwrap();
                    }
                });
            }
            let pool = &pool;
            let applied = &messages[..5];
            scope.spawn(move || {
                for _ in 0..10 {
                    pool.delete_applied(applied);
                    let _ = pool.need_packaged(4096);
                }
            });
        });

        pool.delete_applied(&messages[..5]);
        assert_eq!(pool.len(), 35);
        let fees: Vec<u64> = pool.need_packaged(usize::MAX).iter().map(|m| m.fee).collect();
        assert!(fees.windows(2).all(|w| w[0] >= w[1]));
    }
}
