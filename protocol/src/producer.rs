//! # Block Producer
//!
//! The slot timer of a Kestrel validator. Every [`PRODUCER_TICK`] it asks the
//! chain which slot is due, and if this node's key owns that slot it drains
//! the mempool, builds and signs a block, and inserts it.
//!
//! ```text
//!   tick ──► due slot? ──no──► wait
//!               │
//!              yes
//!               ▼
//!         slot owner == us? ──no──► wait
//!               │
//!              yes
//!               ▼
//!   need_packaged ─► next_block ─► insert ─► mempool.update / expire
//! ```
//!
//! ## Shutdown
//!
//! [`BlockProducer::run`] watches a `tokio::sync::watch` channel. Setting it
//! to `true` (or dropping the sender) stops the loop between ticks; a block
//! is never left half-inserted because insert itself is synchronous.
//!
//! Non-fatal tick failures are logged and retried on the next tick. A fatal
//! error (storage, trie inconsistency) stops the loop and is returned.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::chain::{Chain, ChainError, ChainResult, InsertOutcome};
use crate::config::PRODUCER_TICK;
use crate::crypto::{Address, KestrelKeypair};
use crate::mempool::Mempool;

// ---------------------------------------------------------------------------
// Tick outcome
// ---------------------------------------------------------------------------

/// What one tick of the producer did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// No slot after the tip has started yet.
    Waiting { next_slot: u64 },
    /// The due slot belongs to another super.
    NotOurSlot { slot: u64, owner: Address },
    /// A block was built and inserted.
    Produced {
        height: u64,
        slot: u64,
        messages: usize,
    },
}

// ---------------------------------------------------------------------------
// BlockProducer
// ---------------------------------------------------------------------------

pub struct BlockProducer {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    keypair: KestrelKeypair,
    address: Address,
}

impl BlockProducer {
    pub fn new(chain: Arc<Chain>, mempool: Arc<Mempool>, keypair: KestrelKeypair) -> Self {
        let address = Address::from(keypair.public_key());
        Self {
            chain,
            mempool,
            keypair,
            address,
        }
    }

    /// Address blocks are signed by and the coinbase pays.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Run until `shutdown` flips to `true` or a fatal error occurs.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> ChainResult<()> {
        self.run_with(shutdown, |_| {}).await
    }

    /// Like [`run`](Self::run), reporting every tick result to `observe`.
    pub async fn run_with<F>(
        &self,
        mut shutdown: watch::Receiver<bool>,
        mut observe: F,
    ) -> ChainResult<()>
    where
        F: FnMut(&ChainResult<Tick>),
    {
        info!(producer = %self.address, "block producer starting");
        let mut interval = tokio::time::interval(PRODUCER_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let result = self.try_produce(unix_now());
            observe(&result);
            match result {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal error, stopping block producer");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "production tick failed"),
            }
        }

        info!("block producer stopped");
        Ok(())
    }

    /// One tick at wall-clock second `now`.
    pub fn try_produce(&self, now: u64) -> ChainResult<Tick> {
        let expired = self.mempool.expire_at(now);
        if expired > 0 {
            debug!(expired, "expired stale mempool entries");
        }

        let Some(slot) = self.due_slot(now) else {
            let next_slot = self.chain.next_slot_time(now);
            return Ok(Tick::Waiting { next_slot });
        };

        let owner = self.chain.slot_owner(slot)?;
        if owner != self.address {
            debug!(slot, %owner, "not our slot");
            return Ok(Tick::NotOurSlot { slot, owner });
        }

        let proposal = self
            .mempool
            .need_packaged(self.chain.config().max_block_bytes);
        let block = self.chain.next_block(&proposal, slot, &self.keypair)?;
        let height = block.height();
        let messages = block.messages.len();

        match self.chain.insert(&block)? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Repeat => {
                return Err(ChainError::StaleBlock {
                    height,
                    last: self.chain.last_height(),
                })
            }
        }
        self.mempool.update(&*self.chain);

        info!(
            height,
            slot,
            messages,
            proposed = proposal.len(),
            "produced block"
        );
        Ok(Tick::Produced {
            height,
            slot,
            messages,
        })
    }

    /// Latest slot at or before `now` that follows the tip.
    fn due_slot(&self, now: u64) -> Option<u64> {
        let interval = self.chain.config().block_interval;
        let slot = self
            .chain
            .next_slot_time(now.saturating_sub(interval.saturating_sub(1)));
        (slot <= now).then_some(slot)
    }
}

impl std::fmt::Debug for BlockProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProducer")
            .field("address", &self.address)
            .field("chain", &self.chain)
            .finish()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
