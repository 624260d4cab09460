use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::genesis::{build_genesis, verify_genesis};
use super::reward::{cal_coinbase, minted};
use super::{AppliedSink, ChainError, ChainResult, InsertOutcome};
use crate::config::ChainConfig;
use crate::consensus::{ConsensusError, Dpos, Supers};
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, Hash, KestrelKeypair, MAIN_TOKEN};
use crate::mempool::ChainView;
use crate::message::{verify_coinbase, verify_message, Message, MessageBody, MessageBuilder, MessageError};
use crate::status::{Account, BlockEffects, ExecContext, Status};
use crate::storage::{compute_msg_root, Block, ChainDb, Header, HeaderReader, Roots};

struct ChainState {
    last_height: u64,
    tip: Header,
    /// Highest confirmed height seen since open. A rollback restores an
    /// older confirmed snapshot but never goes below this.
    finalized: u64,
}

/// The chain engine. Share it behind an `Arc`; every method takes `&self`.
pub struct Chain {
    config: Arc<ChainConfig>,
    db: ChainDb,
    status: Arc<Status>,
    dpos: Dpos,
    state: RwLock<ChainState>,
    sink: Option<Arc<dyn AppliedSink>>,
}

impl Chain {
    /// Open the chain stored in `db`, building and inserting genesis if the
    /// store is empty.
    pub fn open(db: ChainDb, config: Arc<ChainConfig>) -> ChainResult<Self> {
        config.validate()?;
        let status = Arc::new(Status::open(&db, config.clone())?);

        let (tip, confirmed) = match db.last_header()? {
            Some(tip) => {
                Self::check_stored_genesis(&db, &config)?;
                let roots = db
                    .post_roots(&tip.hash)?
                    .ok_or_else(|| ChainError::MissingRoots(tip.short_hash()))?;
                status.set_roots(&roots)?;
                let confirmed = db
                    .confirmed_at(tip.height)?
                    .ok_or(ChainError::MissingSnapshot(tip.height))?;
                info!(
                    height = tip.height,
                    confirmed,
                    hash = %tip.short_hash(),
                    "chain opened"
                );
                (tip, confirmed)
            }
            None => (Self::insert_genesis(&db, &status, &config)?, 0),
        };

        let dpos = Dpos::new(config.clone(), db.clone(), status.clone(), confirmed);
        Ok(Self {
            config,
            db,
            status,
            dpos,
            state: RwLock::new(ChainState {
                last_height: tip.height,
                tip,
                finalized: confirmed,
            }),
            sink: None,
        })
    }

    /// Notify `sink` of the messages of every inserted block.
    pub fn with_sink(mut self, sink: Arc<dyn AppliedSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Reject a store whose block 0 is not the genesis `config` describes.
    fn check_stored_genesis(db: &ChainDb, config: &ChainConfig) -> ChainResult<()> {
        let stored = db.header_by_height(0)?.ok_or(ChainError::MissingHeader(0))?;
        let expected = build_genesis(config).header.hash;
        if stored.hash != expected {
            return Err(ChainError::InvalidGenesis(format!(
                "stored genesis {} does not match configured genesis {}",
                stored.short_hash(),
                short_hex(&expected)
            )));
        }
        Ok(())
    }

    fn insert_genesis(db: &ChainDb, status: &Status, config: &ChainConfig) -> ChainResult<Header> {
        let block = build_genesis(config);
        verify_genesis(config, &block)?;

        let header = &block.header;
        let ctx = ExecContext {
            height: 0,
            time: header.time,
            cycle: header.cycle,
            confirmed: 0,
            signer: Address::ZERO,
        };
        let roots = status.apply_genesis(&block.messages, &ctx)?;
        if let Err(e) = db.put_block(&block, &roots, 0) {
            restore_roots(status, &Roots::EMPTY);
            return Err(e.into());
        }

        info!(
            hash = %header.short_hash(),
            allocations = config.genesis.allocations.len(),
            candidates = config.genesis.candidates.len(),
            "genesis block inserted"
        );
        Ok(block.header)
    }

    // -- Reads --------------------------------------------------------------

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn status(&self) -> &Arc<Status> {
        &self.status
    }

    pub fn last_height(&self) -> u64 {
        self.state.read().last_height
    }

    pub fn confirmed_height(&self) -> u64 {
        self.dpos.confirmed()
    }

    pub fn roots(&self) -> Roots {
        let _state = self.state.read();
        self.status.roots()
    }

    pub fn tip(&self) -> Header {
        self.state.read().tip.clone()
    }

    pub fn get_block_by_height(&self, height: u64) -> ChainResult<Option<Block>> {
        Ok(self.db.block_by_height(height)?)
    }

    /// Blocks dropped by a rollback stay reachable by hash.
    pub fn get_block_by_hash(&self, hash: &Hash) -> ChainResult<Option<Block>> {
        Ok(self.db.block_by_hash(hash)?)
    }

    /// A message on the canonical chain and the hash of its block.
    pub fn get_message(&self, hash: &Hash) -> ChainResult<Option<(Message, Hash)>> {
        Ok(self.db.message(hash)?)
    }

    pub fn supers(&self, cycle: u64) -> ChainResult<Option<Supers>> {
        let _state = self.state.read();
        Ok(self.status.supers(cycle)?)
    }

    /// Account state settled against the current confirmed height.
    pub fn account(&self, address: &Address) -> ChainResult<Account> {
        let _state = self.state.read();
        Ok(self.status.account(address, self.confirmed_height())?)
    }

    /// Voting weight `address` contributes: its spendable main-token
    /// balance.
    pub fn vote(&self, address: &Address) -> ChainResult<u64> {
        let _state = self.state.read();
        Ok(self
            .status
            .spendable(address, &MAIN_TOKEN, self.confirmed_height())?)
    }

    /// Flush the block store to disk.
    pub fn flush(&self) -> ChainResult<()> {
        Ok(self.db.flush()?)
    }

    // -- Schedule -----------------------------------------------------------

    /// Earliest slot at or after `now` that could follow the tip.
    pub fn next_slot_time(&self, now: u64) -> u64 {
        let interval = self.config.block_interval;
        let aligned = now - now % interval;
        let slot = if aligned < now { aligned + interval } else { aligned };
        slot.max(self.state.read().tip.time + interval)
    }

    /// Producer owning the slot at `time` on top of the tip.
    pub fn slot_owner(&self, time: u64) -> ChainResult<Address> {
        let state = self.state.read();
        Ok(self.dpos.slot_owner(time, &state.tip)?)
    }

    // -- Production ---------------------------------------------------------

    /// Unsigned header for the slot at `time`, built on the tip with an
    /// empty message root.
    pub fn next_header(&self, time: u64, signer: &Address) -> ChainResult<Header> {
        let state = self.state.read();
        self.prepare_header(&state.tip, time, signer)
    }

    fn prepare_header(&self, tip: &Header, time: u64, signer: &Address) -> ChainResult<Header> {
        if !self.dpos.is_valid_slot(tip, time) {
            return Err(ConsensusError::WrongSlot {
                parent_time: tip.time,
                time,
            }
            .into());
        }
        let expected = self.dpos.slot_owner(time, tip)?;
        if expected != *signer {
            return Err(ConsensusError::WrongSigner {
                expected,
                got: *signer,
            }
            .into());
        }
        Ok(Header::new(
            tip.hash,
            compute_msg_root(&[]),
            self.status.roots(),
            tip.height + 1,
            time,
            self.config.cycle_of(time),
            *signer,
        ))
    }

    /// Build and sign the block for the slot at `time`.
    ///
    /// `messages` is a priority-ordered proposal. Messages that fail any
    /// check, repeat a sender or overflow the byte budget are skipped. The
    /// coinbase is appended last.
    pub fn next_block(
        &self,
        messages: &[Message],
        time: u64,
        keypair: &KestrelKeypair,
    ) -> ChainResult<Block> {
        // Write lock: the dry run stages into the tries' pending sets.
        let state = self.state.write();
        let signer = Address::from(keypair.public_key());
        let mut header = self.prepare_header(&state.tip, time, &signer)?;
        let ctx = ExecContext {
            height: header.height,
            time,
            cycle: header.cycle,
            confirmed: self.dpos.confirmed(),
            signer,
        };

        let mut selected = self.select_messages(messages, &ctx);
        while let Err((index, e)) = self.status.dry_run(&selected, &ctx) {
            if e.is_fatal() {
                return Err(e.into());
            }
            let dropped = selected.remove(index);
            debug!(
                hash = %short_hex(&dropped.hash),
                error = %e,
                "skipping message that fails in block order"
            );
        }

        let fees = selected
            .iter()
            .try_fold(0u64, |acc, m| acc.checked_add(m.fee))
            .ok_or(ChainError::Overflow("fees"))?;
        let amount = self
            .block_reward(&ctx)?
            .checked_add(fees)
            .ok_or(ChainError::Overflow("coinbase"))?;
        selected.push(MessageBuilder::coinbase(signer, amount, header.height, time));

        header.msg_root = compute_msg_root(&selected);
        header.hash = header.compute_hash();
        header.sign(keypair);
        drop(state);

        debug!(
            height = header.height,
            messages = selected.len(),
            fees,
            "built block"
        );
        Ok(Block {
            header,
            messages: selected,
        })
    }

    fn select_messages(&self, messages: &[Message], ctx: &ExecContext) -> Vec<Message> {
        let mut senders = HashSet::new();
        let mut selected = Vec::new();
        let mut bytes = 0usize;

        for msg in messages {
            let hash = short_hex(&msg.hash);
            if msg.is_coinbase() || senders.contains(&msg.from) {
                debug!(%hash, "skipping coinbase or repeated sender");
                continue;
            }
            if let Err(e) = verify_message(msg) {
                debug!(%hash, error = %e, "skipping malformed message");
                continue;
            }
            if let Err(e) = self.status.check_message(msg, ctx, true) {
                debug!(%hash, error = %e, "skipping message");
                continue;
            }
            let size = msg.size_bytes();
            if bytes.saturating_add(size) > self.config.max_block_bytes {
                debug!(%hash, bytes, "block byte budget reached");
                break;
            }
            bytes += size;
            senders.insert(msg.from);
            selected.push(msg.clone());
        }
        selected
    }

    /// Main-token amount the coinbase mints at `ctx`, before fees. Work
    /// comes from the previous cycle.
    fn block_reward(&self, ctx: &ExecContext) -> ChainResult<u64> {
        let (total, own) = match ctx.cycle.checked_sub(1) {
            Some(prev) => (
                self.status.total_work(prev)?,
                self.status.work_of(&ctx.signer, prev)?,
            ),
            None => (0, 0),
        };
        let reward = cal_coinbase(self.config.block_reward, total, own);
        Ok(minted(
            reward,
            self.status.circulation()?,
            self.config.total_circulation,
        ))
    }

    // -- Insert -------------------------------------------------------------

    /// Validate, apply and persist `block` on top of the tip.
    ///
    /// On any error the chain is unchanged.
    pub fn insert(&self, block: &Block) -> ChainResult<InsertOutcome> {
        let outcome = {
            let mut state = self.state.write();
            match self.insert_locked(&mut state, block) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        height = block.header.height,
                        hash = %block.header.short_hash(),
                        error = %e,
                        "block rejected"
                    );
                    return Err(e);
                }
            }
        };

        if outcome == InsertOutcome::Inserted {
            if let Some(sink) = &self.sink {
                sink.delete_applied(&block.messages);
            }
        }
        Ok(outcome)
    }

    fn insert_locked(&self, state: &mut ChainState, block: &Block) -> ChainResult<InsertOutcome> {
        let header = &block.header;

        if header.height <= state.last_height {
            if header.hash == state.tip.hash {
                debug!(height = header.height, "repeat of the current tip");
                return Ok(InsertOutcome::Repeat);
            }
            return Err(ChainError::StaleBlock {
                height: header.height,
                last: state.last_height,
            });
        }
        if header.height != state.last_height + 1 {
            return Err(ChainError::HeightGap {
                expected: state.last_height + 1,
                got: header.height,
            });
        }
        if compute_msg_root(&block.messages) != header.msg_root {
            return Err(ChainError::MsgRootMismatch);
        }

        let pre = self.status.roots();
        if header.roots() != pre {
            return Err(ChainError::WrongRoot {
                expected: short_hex(&pre.act),
                got: short_hex(&header.act_root),
            });
        }

        let parent = self
            .db
            .header_by_hash(&header.pre_hash)?
            .ok_or_else(|| ChainError::UnknownParent(short_hex(&header.pre_hash)))?;
        if parent.hash != state.tip.hash {
            return Err(ChainError::ForkParent(parent.short_hash()));
        }

        self.dpos.check_header(header, &parent)?;
        let seal = self.dpos.check_seal(header, &parent)?;

        let ctx = ExecContext {
            height: header.height,
            time: header.time,
            cycle: header.cycle,
            confirmed: seal.confirmed,
            signer: header.signer,
        };
        let minted = self.validate_messages(block, &ctx)?;

        let effects = BlockEffects {
            elected: seal.elected.as_ref(),
            minted,
        };
        let post = self.status.apply_block(&block.messages, &ctx, &effects)?;
        if let Err(e) = self.db.put_block(block, &post, seal.confirmed) {
            error!(height = header.height, error = %e, "failed to persist block");
            restore_roots(&self.status, &pre);
            return Err(e.into());
        }

        let previous = self.dpos.confirmed();
        self.dpos.set_confirmed(seal.confirmed);
        state.last_height = header.height;
        state.tip = header.clone();
        state.finalized = state.finalized.max(seal.confirmed);

        info!(
            height = header.height,
            hash = %header.short_hash(),
            signer = %header.signer,
            messages = block.messages.len(),
            confirmed = seal.confirmed,
            "block inserted"
        );
        if seal.confirmed > previous {
            info!(from = previous, to = seal.confirmed, "confirmed height advanced");
        }
        Ok(InsertOutcome::Inserted)
    }

    /// Coinbase and per-message checks. Returns the minted amount.
    fn validate_messages(&self, block: &Block, ctx: &ExecContext) -> ChainResult<u64> {
        let Some((coinbase, user)) = block.messages.split_last() else {
            return Err(ChainError::MissingCoinbase);
        };
        let MessageBody::Coinbase { to, amount } = &coinbase.body else {
            return Err(ChainError::MissingCoinbase);
        };
        if user.iter().any(Message::is_coinbase) {
            return Err(ChainError::MisplacedCoinbase);
        }
        let coinbase_error = |source| ChainError::Message {
            hash: short_hex(&coinbase.hash),
            source,
        };
        verify_coinbase(coinbase).map_err(coinbase_error)?;
        if coinbase.nonce != ctx.height || coinbase.time != ctx.time {
            return Err(coinbase_error(MessageError::MalformedCoinbase(
                "height or time differs from the block".into(),
            )));
        }
        if *to != ctx.signer {
            return Err(ChainError::CoinbaseRecipient {
                expected: ctx.signer,
                got: *to,
            });
        }

        let mut senders = HashSet::new();
        let mut bytes = 0usize;
        for msg in user {
            if !senders.insert(msg.from) {
                return Err(ChainError::DuplicateSender(msg.from));
            }
            verify_message(msg).map_err(|source| ChainError::Message {
                hash: short_hex(&msg.hash),
                source,
            })?;
            self.status.check_message(msg, ctx, true)?;
            bytes = bytes.saturating_add(msg.size_bytes());
        }
        if bytes > self.config.max_block_bytes {
            return Err(ChainError::BlockTooLarge {
                size: bytes,
                max: self.config.max_block_bytes,
            });
        }

        let fees = block.total_fees().ok_or(ChainError::Overflow("fees"))?;
        let minted = self.block_reward(ctx)?;
        let expected = minted
            .checked_add(fees)
            .ok_or(ChainError::Overflow("coinbase"))?;
        if *amount != expected {
            return Err(ChainError::WrongCoinbase {
                expected,
                got: *amount,
            });
        }
        Ok(minted)
    }

    // -- Rollback -----------------------------------------------------------

    /// Roll back to the confirmed height.
    pub fn roll(&self) -> ChainResult<Vec<Header>> {
        let target = self.dpos.confirmed().max(self.state.read().finalized);
        self.rollback_to(target)
    }

    /// Rewind the chain to `height`, which must lie between the confirmed
    /// height and the tip. Returns the dropped headers, highest first.
    pub fn rollback_to(&self, height: u64) -> ChainResult<Vec<Header>> {
        let mut state = self.state.write();
        let confirmed = self.dpos.confirmed().max(state.finalized);
        if height < confirmed {
            return Err(ChainError::BelowConfirmed {
                target: height,
                confirmed,
            });
        }
        if height > state.last_height {
            return Err(ChainError::AboveTip {
                target: height,
                last: state.last_height,
            });
        }
        if height == state.last_height {
            return Ok(Vec::new());
        }

        let snapshot = self
            .db
            .confirmed_at(height)?
            .ok_or(ChainError::MissingSnapshot(height))?;
        let target = self
            .db
            .header_by_height(height)?
            .ok_or(ChainError::MissingHeader(height))?;
        let next = self
            .db
            .header_by_height(height + 1)?
            .ok_or(ChainError::MissingHeader(height + 1))?;

        let current = self.status.roots();
        if let Err(e) = self.status.set_roots(&next.roots()) {
            restore_roots(&self.status, &current);
            return Err(e.into());
        }
        let dropped = match self.db.truncate_above(height) {
            Ok(dropped) => dropped,
            Err(e) => {
                restore_roots(&self.status, &current);
                return Err(e.into());
            }
        };

        let from = state.last_height;
        self.dpos.set_confirmed(snapshot);
        state.last_height = height;
        state.tip = target;

        info!(
            from,
            to = height,
            dropped = dropped.len(),
            confirmed = snapshot,
            "rolled back"
        );
        Ok(dropped)
    }
}

fn restore_roots(status: &Status, roots: &Roots) {
    if let Err(e) = status.set_roots(roots) {
        error!(error = %e, "failed to restore status roots");
    }
}

impl ChainView for Chain {
    fn nonce(&self, address: &Address) -> Option<u64> {
        let _state = self.state.read();
        match self.status.nonce(address) {
            Ok(nonce) => Some(nonce),
            Err(e) => {
                warn!(%address, error = %e, "nonce lookup failed");
                None
            }
        }
    }

    fn height(&self) -> u64 {
        self.last_height()
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Chain")
            .field("last_height", &state.last_height)
            .field("tip", &state.tip.short_hash())
            .field("confirmed", &self.dpos.confirmed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
