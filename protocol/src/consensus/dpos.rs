//! Leader schedule, header validation and finality.
//!
//! [`Dpos`] keeps no state of its own besides a cached confirmed height.
//! Supers are read from the DPoS status trie and headers from a
//! [`HeaderReader`]; everything else is recomputed on demand.
//!
//! ## Election seed
//!
//! A cycle's supers are seeded by the hash of the last block *before* the
//! cycle. Stored supers carry that hash; if it differs from what the
//! current chain says (a rollback replaced the tail of the previous cycle)
//! the stored list is stale and the cycle is re-elected.
//!
//! ## Confirmation
//!
//! Walking back from a new header through blocks above the confirmed
//! height, distinct signers are counted per cycle. When the count reaches
//! `dpos_size` the height the walk stopped at becomes the new confirmed
//! height.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::election::{rank, shuffle, shuffle_seed, weigh_candidates};
use super::{ConsensusError, ConsensusResult, Member, Supers};
use crate::config::{ChainConfig, BLOCK_VERSION};
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, Hash};
use crate::status::Status;
use crate::storage::{ChainDb, Header, HeaderReader};

/// Result of a successful seal check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealOutcome {
    /// Confirmed height once the block is applied.
    pub confirmed: u64,
    /// Supers elected during the check, to be persisted with the block.
    pub elected: Option<Supers>,
}

pub struct Dpos<R: HeaderReader = ChainDb> {
    config: Arc<ChainConfig>,
    headers: R,
    status: Arc<Status>,
    confirmed: AtomicU64,
}

impl<R: HeaderReader> Dpos<R> {
    pub fn new(config: Arc<ChainConfig>, headers: R, status: Arc<Status>, confirmed: u64) -> Self {
        Self {
            config,
            headers,
            status,
            confirmed: AtomicU64::new(confirmed),
        }
    }

    pub fn confirmed(&self) -> u64 {
        self.confirmed.load(Ordering::Acquire)
    }

    pub fn set_confirmed(&self, height: u64) {
        self.confirmed.store(height, Ordering::Release);
    }

    // -- Election -----------------------------------------------------------

    /// Elect the supers of the cycle containing `time`, seeded by
    /// `pre_hash`. Nothing is persisted.
    pub fn elect(&self, time: u64, pre_hash: &Hash) -> ConsensusResult<Supers> {
        let cycle = self.config.cycle_of(time);
        let candidates = weigh_candidates(&self.status, self.confirmed())?;
        if candidates.len() < self.config.min_candidates {
            return Err(ConsensusError::NotEnoughCandidates {
                have: candidates.len(),
                need: self.config.min_candidates,
            });
        }

        let mut members = rank(candidates, self.config.super_size);
        shuffle(&mut members, shuffle_seed(pre_hash, cycle));

        info!(
            cycle,
            seed = %short_hex(pre_hash),
            supers = members.len(),
            "elected supers"
        );
        Ok(Supers {
            cycle,
            pre_hash: *pre_hash,
            members,
        })
    }

    /// Hash of the last block before `cycle` on the chain ending at
    /// `parent`.
    pub fn prior_cycle_seed(&self, cycle: u64, parent: &Header) -> ConsensusResult<Hash> {
        if parent.cycle < cycle {
            return Ok(parent.hash);
        }

        if let Some(prev) = cycle.checked_sub(1) {
            if let Some(hash) = self.headers.cycle_last(prev)? {
                if let Some(last) = self.headers.header_by_hash(&hash)? {
                    let canonical = self.headers.hash_at(last.height)? == Some(hash);
                    if canonical && last.cycle < cycle && last.height <= parent.height {
                        return Ok(hash);
                    }
                }
            }
        }

        debug!(cycle, from = parent.height, "cycle index miss, walking headers");
        let mut cur = parent.clone();
        while cur.cycle >= cycle && cur.height > 0 {
            cur = self
                .headers
                .header_by_hash(&cur.pre_hash)?
                .ok_or_else(|| ConsensusError::MissingHeader(short_hex(&cur.pre_hash)))?;
        }
        Ok(cur.hash)
    }

    /// Supers for the slot at `time` on top of `parent`, and whether they
    /// were freshly elected rather than read back from status.
    pub fn supers_for(&self, time: u64, parent: &Header) -> ConsensusResult<(Supers, bool)> {
        let cycle = self.config.cycle_of(time);
        let seed = self.prior_cycle_seed(cycle, parent)?;
        if let Some(stored) = self.status.supers(cycle)? {
            if stored.pre_hash == seed {
                return Ok((stored, false));
            }
            debug!(
                cycle,
                stored = %short_hex(&stored.pre_hash),
                seed = %short_hex(&seed),
                "stored supers are stale"
            );
        }
        Ok((self.elect(time, &seed)?, true))
    }

    // -- Schedule -----------------------------------------------------------

    /// The member owning the slot at `time`.
    pub fn lookup_super<'a>(&self, time: u64, supers: &'a Supers) -> ConsensusResult<&'a Member> {
        let within = time % self.config.cycle_interval;
        if within % self.config.block_interval != 0 {
            return Err(ConsensusError::NotSlotAligned { time });
        }
        let offset = within / self.config.block_interval;
        let len = supers.members.len() as u64;
        if len == 0 {
            return Err(ConsensusError::NoSupers {
                cycle: supers.cycle,
            });
        }
        supers
            .members
            .get((offset % len) as usize)
            .ok_or(ConsensusError::NoSupers {
                cycle: supers.cycle,
            })
    }

    /// Signer expected at `time` on top of `parent`.
    pub fn slot_owner(&self, time: u64, parent: &Header) -> ConsensusResult<Address> {
        let (supers, _) = self.supers_for(time, parent)?;
        Ok(self.lookup_super(time, &supers)?.signer)
    }

    /// Whether a child of `parent` may carry `time`: a later slot boundary at
    /// most `max_skipped_slots` slots past the next one.
    pub fn is_valid_slot(&self, parent: &Header, time: u64) -> bool {
        let interval = self.config.block_interval;
        let Some(delta) = time.checked_sub(parent.time) else {
            return false;
        };
        if delta == 0 || delta % interval != 0 {
            return false;
        }
        delta / interval <= self.config.max_skipped_slots.saturating_add(1)
    }

    // -- Checks -------------------------------------------------------------

    pub fn check_time(&self, parent: &Header, header: &Header) -> ConsensusResult<()> {
        if self.is_valid_slot(parent, header.time) {
            Ok(())
        } else {
            Err(ConsensusError::WrongSlot {
                parent_time: parent.time,
                time: header.time,
            })
        }
    }

    /// Structural checks of `header` against its parent.
    pub fn check_header(&self, header: &Header, parent: &Header) -> ConsensusResult<()> {
        if header.version != BLOCK_VERSION {
            return Err(ConsensusError::WrongVersion {
                got: header.version,
            });
        }
        if header.signature.is_empty() {
            return Err(ConsensusError::MissingSignature);
        }
        if header.pre_hash != parent.hash {
            return Err(ConsensusError::WrongParent {
                expected: short_hex(&parent.hash),
                got: short_hex(&header.pre_hash),
            });
        }
        if header.height != parent.height + 1 {
            return Err(ConsensusError::WrongHeight {
                expected: parent.height + 1,
                got: header.height,
            });
        }
        let cycle = self.config.cycle_of(header.time);
        if header.cycle != cycle {
            return Err(ConsensusError::WrongCycle {
                expected: cycle,
                got: header.cycle,
            });
        }
        if parent.time.saturating_add(self.config.block_interval) > header.time {
            return Err(ConsensusError::TooEarly {
                parent_time: parent.time,
                time: header.time,
            });
        }
        if header.compute_hash() != header.hash {
            return Err(ConsensusError::HashMismatch);
        }
        self.check_time(parent, header)
    }

    /// Signer and signature checks, then the confirmation walk.
    pub fn check_seal(&self, header: &Header, parent: &Header) -> ConsensusResult<SealOutcome> {
        if header.height == 0 {
            return Err(ConsensusError::GenesisSeal);
        }
        let confirmed = self.confirmed();
        if header.height <= confirmed {
            return Err(ConsensusError::AlreadyConfirmed {
                height: header.height,
                confirmed,
            });
        }

        let (supers, fresh) = self.supers_for(header.time, parent)?;
        let expected = self.lookup_super(header.time, &supers)?.signer;
        if header.signer != expected {
            return Err(ConsensusError::WrongSigner {
                expected,
                got: header.signer,
            });
        }
        if !header.verify_signature() {
            return Err(ConsensusError::BadSignature);
        }

        Ok(SealOutcome {
            confirmed: self.update_confirmed(header)?,
            elected: fresh.then_some(supers),
        })
    }

    /// Confirmed height after `header` joins the chain. `header` itself
    /// need not be stored yet.
    pub fn update_confirmed(&self, header: &Header) -> ConsensusResult<u64> {
        let confirmed = self.confirmed();
        let threshold = self.config.dpos_size();
        let mut signers: HashSet<Address> = HashSet::new();
        let mut cycle = header.cycle;
        let mut cur = header.clone();

        while cur.height > confirmed {
            if cur.cycle != cycle {
                signers.clear();
                cycle = cur.cycle;
            }
            signers.insert(cur.signer);
            if signers.len() >= threshold {
                return Ok(cur.height);
            }
            cur = self
                .headers
                .header_by_hash(&cur.pre_hash)?
                .ok_or_else(|| ConsensusError::MissingHeader(short_hex(&cur.pre_hash)))?;
        }
        Ok(confirmed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootstrapCandidate, GenesisConfig};
    use crate::crypto::{KestrelKeypair, KestrelSignature, ZERO_HASH};
    use crate::message::MessageBuilder;
    use crate::status::{BlockEffects, ExecContext};
    use crate::storage::{compute_msg_root, Block, DbResult, Roots};

    const GENESIS: u64 = 1_700_000_000;

    fn keys() -> Vec<KestrelKeypair> {
        (1..=9u8).map(|i| KestrelKeypair::from_seed(&[i; 32])).collect()
    }

    fn config() -> ChainConfig {
        ChainConfig {
            cycle_interval: 100,
            block_interval: 10,
            super_size: 9,
            min_candidates: 7,
            genesis: GenesisConfig {
                time: GENESIS,
                allocations: Vec::new(),
                candidates: keys()
                    .iter()
                    .enumerate()
                    .map(|(i, k)| BootstrapCandidate {
                        address: Address::from(k.public_key()),
                        peer_id: format!("peer-{i}"),
                    })
                    .collect(),
            },
            ..ChainConfig::default()
        }
    }

    struct Fixture {
        db: ChainDb,
        status: Arc<Status>,
        dpos: Dpos,
        keys: Vec<KestrelKeypair>,
        genesis: Header,
    }

    fn fixture_with(cfg: ChainConfig) -> Fixture {
        let cfg = Arc::new(cfg);
        let db = ChainDb::open_temporary().unwrap();
        let status = Arc::new(Status::open(&db, cfg.clone()).unwrap());
        let messages: Vec<_> = cfg
            .genesis
            .candidates
            .iter()
            .map(|c| {
                MessageBuilder::candidate(c.peer_id.clone())
                    .nonce(1)
                    .build_unsigned(c.address)
            })
            .collect();
        let ctx = ExecContext {
            height: 0,
            time: GENESIS,
            cycle: cfg.cycle_of(GENESIS),
            confirmed: 0,
            signer: Address::ZERO,
        };
        let roots = status.apply_genesis(&messages, &ctx).unwrap();
        let genesis = Header::new(
            ZERO_HASH,
            compute_msg_root(&messages),
            Roots::EMPTY,
            0,
            GENESIS,
            cfg.cycle_of(GENESIS),
            Address::ZERO,
        );
        db.put_block(
            &Block {
                header: genesis.clone(),
                messages,
            },
            &roots,
            0,
        )
        .unwrap();
        let dpos = Dpos::new(cfg, db.clone(), status.clone(), 0);
        Fixture {
            db,
            status,
            dpos,
            keys: keys(),
            genesis,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(config())
    }

    impl Fixture {
        /// A correctly signed child of `parent` at `time`, not stored.
        fn child(&self, parent: &Header, time: u64) -> (Header, Option<Supers>) {
            let (supers, fresh) = self.dpos.supers_for(time, parent).unwrap();
            let signer = self.dpos.lookup_super(time, &supers).unwrap().signer;
            let kp = self
                .keys
                .iter()
                .find(|k| Address::from(k.public_key()) == signer)
                .unwrap();
            let mut header = Header::new(
                parent.hash,
                compute_msg_root(&[]),
                self.status.roots(),
                parent.height + 1,
                time,
                time / 100,
                signer,
            );
            header.sign(kp);
            (header, fresh.then_some(supers))
        }

        /// Append `count` blocks in consecutive slots without advancing the
        /// cached confirmed height.
        fn extend(&self, count: u64) -> Vec<Header> {
            let mut parent = self.db.last_header().unwrap().unwrap();
            let mut out = Vec::new();
            for _ in 0..count {
                let (header, elected) = self.child(&parent, parent.time + 10);
                let ctx = ExecContext {
                    height: header.height,
                    time: header.time,
                    cycle: header.cycle,
                    confirmed: 0,
                    signer: header.signer,
                };
                let effects = BlockEffects {
                    elected: elected.as_ref(),
                    minted: 0,
                };
                let roots = self.status.apply_block(&[], &ctx, &effects).unwrap();
                let block = Block {
                    header: header.clone(),
                    messages: Vec::new(),
                };
                self.db.put_block(&block, &roots, 0).unwrap();
                out.push(header.clone());
                parent = header;
            }
            out
        }
    }

    /// Reader whose cycle index is always empty, forcing the header walk.
    struct NoCycleIndex(ChainDb);

    impl HeaderReader for NoCycleIndex {
        fn header_by_hash(&self, hash: &Hash) -> DbResult<Option<Header>> {
            self.0.header_by_hash(hash)
        }
        fn hash_at(&self, height: u64) -> DbResult<Option<Hash>> {
            self.0.hash_at(height)
        }
        fn cycle_last(&self, _cycle: u64) -> DbResult<Option<Hash>> {
            Ok(None)
        }
    }

    #[test]
    fn election_is_deterministic() {
        let f = fixture();
        let a = f.dpos.elect(GENESIS + 10, &f.genesis.hash).unwrap();
        let b = f.dpos.elect(GENESIS + 10, &f.genesis.hash).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.members.len(), 9);
        assert_eq!(a.pre_hash, f.genesis.hash);
    }

    #[test]
    fn election_seed_changes_order() {
        let f = fixture();
        let orders: HashSet<Vec<Address>> = (0..8u8)
            .map(|b| {
                f.dpos
                    .elect(GENESIS + 10, &[b; 32])
                    .unwrap()
                    .members
                    .iter()
                    .map(|m| m.signer)
                    .collect()
            })
            .collect();
        assert!(orders.len() > 1);
    }

    #[test]
    fn election_truncates_to_super_size() {
        let f = fixture_with(ChainConfig {
            super_size: 5,
            min_candidates: 3,
            ..config()
        });
        let supers = f.dpos.elect(GENESIS + 10, &f.genesis.hash).unwrap();
        assert_eq!(supers.members.len(), 5);
    }

    #[test]
    fn election_requires_quorum_of_candidates() {
        let f = fixture_with(ChainConfig {
            min_candidates: 10,
            ..config()
        });
        assert!(matches!(
            f.dpos.elect(GENESIS + 10, &f.genesis.hash),
            Err(ConsensusError::NotEnoughCandidates { have: 9, need: 10 })
        ));
    }

    #[test]
    fn every_slot_maps_to_an_elected_super() {
        let f = fixture();
        let supers = f.dpos.elect(GENESIS, &f.genesis.hash).unwrap();
        for slot in 0..10u64 {
            let time = GENESIS + slot * 10;
            let member = f.dpos.lookup_super(time, &supers).unwrap();
            assert!(supers.contains(&member.signer));
            assert_eq!(member, &supers.members[(slot % 9) as usize]);
        }
        assert!(matches!(
            f.dpos.lookup_super(GENESIS + 5, &supers),
            Err(ConsensusError::NotSlotAligned { .. })
        ));
    }

    #[test]
    fn check_time_allows_exactly_the_next_slot() {
        let f = fixture();
        let (mut header, _) = f.child(&f.genesis, GENESIS + 10);
        f.dpos.check_time(&f.genesis, &header).unwrap();
        for bad in [GENESIS, GENESIS + 5, GENESIS + 20] {
            header.time = bad;
            assert!(matches!(
                f.dpos.check_time(&f.genesis, &header),
                Err(ConsensusError::WrongSlot { .. })
            ));
        }
    }

    #[test]
    fn skipped_slots_widen_the_window() {
        let f = fixture_with(ChainConfig {
            max_skipped_slots: 1,
            ..config()
        });
        let (mut header, _) = f.child(&f.genesis, GENESIS + 20);
        f.dpos.check_time(&f.genesis, &header).unwrap();
        header.time = GENESIS + 30;
        assert!(f.dpos.check_time(&f.genesis, &header).is_err());
    }

    #[test]
    fn check_header_rejects_malformed_headers() {
        let f = fixture();
        let (good, _) = f.child(&f.genesis, GENESIS + 10);
        f.dpos.check_header(&good, &f.genesis).unwrap();

        let mut unsigned = good.clone();
        unsigned.signature = KestrelSignature::default();
        assert!(matches!(
            f.dpos.check_header(&unsigned, &f.genesis),
            Err(ConsensusError::MissingSignature)
        ));

        let mut wrong_height = good.clone();
        wrong_height.height = 5;
        assert!(matches!(
            f.dpos.check_header(&wrong_height, &f.genesis),
            Err(ConsensusError::WrongHeight { expected: 1, got: 5 })
        ));

        let mut wrong_cycle = good.clone();
        wrong_cycle.cycle += 1;
        assert!(matches!(
            f.dpos.check_header(&wrong_cycle, &f.genesis),
            Err(ConsensusError::WrongCycle { .. })
        ));

        let mut tampered = good.clone();
        tampered.msg_root = [1u8; 32];
        assert!(matches!(
            f.dpos.check_header(&tampered, &f.genesis),
            Err(ConsensusError::HashMismatch)
        ));

        let mut orphan = good;
        orphan.pre_hash = [9u8; 32];
        assert!(matches!(
            f.dpos.check_header(&orphan, &f.genesis),
            Err(ConsensusError::WrongParent { .. })
        ));
    }

    #[test]
    fn check_seal_accepts_slot_owner_and_reports_election() {
        let f = fixture();
        let (header, _) = f.child(&f.genesis, GENESIS + 10);
        let outcome = f.dpos.check_seal(&header, &f.genesis).unwrap();
        assert_eq!(outcome.confirmed, 0);
        assert!(outcome.elected.is_some());
    }

    #[test]
    fn check_seal_rejects_wrong_signer_and_bad_signature() {
        let f = fixture();
        let (good, _) = f.child(&f.genesis, GENESIS + 10);

        let impostor = f
            .keys
            .iter()
            .find(|k| Address::from(k.public_key()) != good.signer)
            .unwrap();
        let mut wrong = good.clone();
        wrong.signer = Address::from(impostor.public_key());
        wrong.hash = wrong.compute_hash();
        wrong.sign(impostor);
        assert!(matches!(
            f.dpos.check_seal(&wrong, &f.genesis),
            Err(ConsensusError::WrongSigner { .. })
        ));

        let mut forged = good;
        forged.sign(impostor);
        assert!(matches!(
            f.dpos.check_seal(&forged, &f.genesis),
            Err(ConsensusError::BadSignature)
        ));

        assert!(matches!(
            f.dpos.check_seal(&f.genesis, &f.genesis),
            Err(ConsensusError::GenesisSeal)
        ));
    }

    #[test]
    fn check_seal_rejects_confirmed_heights() {
        let f = fixture();
        let (header, _) = f.child(&f.genesis, GENESIS + 10);
        f.dpos.set_confirmed(3);
        assert!(matches!(
            f.dpos.check_seal(&header, &f.genesis),
            Err(ConsensusError::AlreadyConfirmed { height: 1, confirmed: 3 })
        ));
    }

    #[test]
    fn six_distinct_signers_do_not_confirm() {
        let f = fixture();
        let chain = f.extend(5);
        let (sixth, _) = f.child(chain.last().unwrap(), GENESIS + 60);
        assert_eq!(f.dpos.update_confirmed(&sixth).unwrap(), 0);
    }

    #[test]
    fn seven_distinct_signers_confirm() {
        let f = fixture();
        let chain = f.extend(6);
        let (seventh, _) = f.child(chain.last().unwrap(), GENESIS + 70);
        assert_eq!(f.dpos.update_confirmed(&seventh).unwrap(), 1);

        f.db.put_block(
            &Block {
                header: seventh.clone(),
                messages: Vec::new(),
            },
            &f.status.roots(),
            1,
        )
        .unwrap();
        f.dpos.set_confirmed(1);
        let (eighth, _) = f.child(&seventh, GENESIS + 80);
        assert_eq!(f.dpos.update_confirmed(&eighth).unwrap(), 2);
    }

    #[test]
    fn first_block_of_a_cycle_is_seeded_by_its_parent() {
        let f = fixture();
        // Heights 1..=9 fill cycle 0 after genesis; height 10 opens cycle 1.
        let chain = f.extend(11);
        let last_of_first = &chain[8];
        let first_of_second = &chain[9];
        let cycle = first_of_second.cycle;
        assert_eq!(cycle, last_of_first.cycle + 1);

        assert_eq!(
            f.dpos.prior_cycle_seed(cycle, last_of_first).unwrap(),
            last_of_first.hash
        );
        assert_eq!(
            f.dpos.prior_cycle_seed(cycle, first_of_second).unwrap(),
            last_of_first.hash
        );
        assert_eq!(
            f.status.supers(cycle).unwrap().unwrap().pre_hash,
            last_of_first.hash
        );
    }

    #[test]
    fn seed_falls_back_to_walking_headers() {
        let f = fixture();
        let chain = f.extend(11);
        let walker = Dpos::new(
            Arc::new(config()),
            NoCycleIndex(f.db.clone()),
            f.status.clone(),
            0,
        );
        assert_eq!(
            walker.prior_cycle_seed(chain[10].cycle, &chain[10]).unwrap(),
            chain[8].hash
        );
        // Within the genesis cycle the walk ends at genesis.
        assert_eq!(
            walker.prior_cycle_seed(chain[0].cycle, &chain[3]).unwrap(),
            f.genesis.hash
        );
    }

    #[test]
    fn stored_supers_are_reused_until_stale() {
        let f = fixture();
        let chain = f.extend(2);
        let (stored, fresh) = f.dpos.supers_for(GENESIS + 30, &chain[1]).unwrap();
        assert!(!fresh);
        assert_eq!(stored.pre_hash, f.genesis.hash);
    }
}
