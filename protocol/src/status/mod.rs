//! # Status Layer
//!
//! World state behind three Merkle-committed tries:
//!
//! ```text
//! account.rs   - balances, nonces, settlement journals, work reports
//! dpos.rs      - candidates, votes, elected supers, mint counters
//! token.rs     - token registry and main-token circulation
//! contract.rs  - read-only token methods
//! ```
//!
//! [`Status`] is the façade the chain engine talks to. The three sub-stores
//! share one `RwLock`. Applying or dry-running a block holds it for
//! writing from the first staged write until commit or revert, so a reader
//! never observes a write that may not be committed.
//!
//! ## Applying a block
//!
//! Message effects are staged in the tries' pending sets. If any message
//! fails, every staged write is reverted and the roots are untouched. Only
//! after the whole block applied cleanly are the three tries committed. If
//! one of those commits fails, all three are put back on their old roots.

pub mod account;
pub mod contract;
pub mod dpos;
pub mod token;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::ChainConfig;
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, MAIN_TOKEN, ZERO_HASH};
use crate::message::{Message, MessageBody};
use crate::storage::{ChainDb, DbError, Roots, SledTrie, TrieError, TrieStore};

pub use account::{Account, AccountStatus, JournalEntry, TokenBalance};
pub use contract::{ContractCall, ContractMethod, ContractValue};
pub use dpos::{CandidateRecord, DposStatus, Member, Supers};
pub use token::{Issuance, TokenRecord, TokenStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),

    #[error("storage error: {0}")]
    Db(#[from] DbError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid nonce for {address}: expected {expected}, got {got}")]
    InvalidNonce {
        address: Address,
        expected: u64,
        got: u64,
    },

    #[error("stale nonce for {address}: current {current}, got {got}")]
    StaleNonce {
        address: Address,
        current: u64,
        got: u64,
    },

    #[error("insufficient balance for {address}: token {token} needs {need}, has {have}")]
    InsufficientBalance {
        address: Address,
        token: Address,
        need: u64,
        have: u64,
    },

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("{0} is not a registered candidate")]
    UnknownCandidate(Address),

    #[error("unknown token {0}")]
    UnknownToken(Address),

    #[error("token {token} belongs to issuer {issuer}")]
    NotIssuer { token: Address, issuer: Address },

    #[error("token {0} has a fixed supply")]
    SupplyFixed(Address),

    #[error("unknown contract method {0:?}")]
    UnknownMethod(String),

    #[error("bad arguments for {method}: {len} bytes")]
    BadContractArgs { method: &'static str, len: usize },

    #[error("minting {minted} exceeds remaining supply {remaining}")]
    CirculationCap { minted: u64, remaining: u64 },

    #[error("work report for future cycle {cycle} (current {current})")]
    FutureWork { cycle: u64, current: u64 },

    #[error("coinbase cannot be applied as a user message")]
    UnexpectedCoinbase,
}

impl StatusError {
    /// Storage failures, as opposed to a message that is simply invalid.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Trie(_) | Self::Db(_) | Self::Serialization(_))
    }
}

pub type StatusResult<T> = Result<T, StatusError>;

pub(crate) fn encode<T: Serialize>(value: &T) -> StatusResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StatusError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StatusResult<T> {
    bincode::deserialize(bytes).map_err(|e| StatusError::Serialization(e.to_string()))
}

pub(crate) fn decode_u64(bytes: &[u8]) -> StatusResult<u64> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| StatusError::Serialization("invalid u64 bytes".into()))
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// The block a message is being checked or applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    pub height: u64,
    pub time: u64,
    pub cycle: u64,
    /// Confirmed height journals are settled against.
    pub confirmed: u64,
    pub signer: Address,
}

/// Block-level effects applied after the messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockEffects<'a> {
    /// Supers elected while checking this block, to be persisted.
    pub elected: Option<&'a Supers>,
    /// Main-token amount created by the coinbase (fees excluded).
    pub minted: u64,
}

/// What a message takes from its sender, merged per token.
pub fn charges(msg: &Message, config: &ChainConfig) -> StatusResult<Vec<(Address, u64)>> {
    fn push(out: &mut Vec<(Address, u64)>, token: Address, amount: u64) -> StatusResult<()> {
        match out.iter_mut().find(|(t, _)| *t == token) {
            Some((_, total)) => {
                *total = total
                    .checked_add(amount)
                    .ok_or(StatusError::Overflow("charges"))?;
            }
            None => out.push((token, amount)),
        }
        Ok(())
    }

    let mut out = Vec::with_capacity(2);
    match &msg.body {
        MessageBody::Transfer { token, amount, .. } => {
            push(&mut out, *token, *amount)?;
            push(&mut out, MAIN_TOKEN, msg.fee)?;
        }
        MessageBody::TokenIssue { .. } => {
            let total = msg
                .fee
                .checked_add(config.token_issue_cost)
                .ok_or(StatusError::Overflow("charges"))?;
            push(&mut out, MAIN_TOKEN, total)?;
        }
        _ => push(&mut out, MAIN_TOKEN, msg.fee)?,
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// The three sub-stores. They share one lock: a block's staged writes live
/// only while the write guard is held, so readers see committed state.
struct Stores {
    accounts: AccountStatus,
    dpos: DposStatus,
    tokens: TokenStatus,
}

impl Stores {
    fn roots(&self) -> Roots {
        Roots {
            act: self.accounts.root(),
            dpos: self.dpos.root(),
            token: self.tokens.root(),
        }
    }

    fn set_roots(&mut self, roots: &Roots) -> StatusResult<()> {
        self.accounts.set_root(roots.act)?;
        self.dpos.set_root(roots.dpos)?;
        self.tokens.set_root(roots.token)?;
        Ok(())
    }

    fn revert(&mut self) {
        self.accounts.revert();
        self.dpos.revert();
        self.tokens.revert();
    }

    /// Commit all three tries. If any commit fails, every trie is put back
    /// on its pre-commit root.
    fn commit(&mut self) -> StatusResult<Roots> {
        let pre = self.roots();
        match self.commit_each() {
            Ok(roots) => Ok(roots),
            Err(e) => {
                error!(error = %e, "status commit failed, restoring roots");
                self.restore(&pre);
                Err(e)
            }
        }
    }

    fn commit_each(&mut self) -> StatusResult<Roots> {
        Ok(Roots {
            act: self.accounts.commit()?,
            dpos: self.dpos.commit()?,
            token: self.tokens.commit()?,
        })
    }

    fn restore(&mut self, roots: &Roots) {
        let results = [
            self.accounts.set_root(roots.act),
            self.dpos.set_root(roots.dpos),
            self.tokens.set_root(roots.token),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            error!(error = %e, "failed to restore status root");
        }
    }

    fn check_body(&self, msg: &Message, ctx: &ExecContext) -> StatusResult<()> {
        match &msg.body {
            MessageBody::Transfer { token, .. } => {
                if *token != MAIN_TOKEN && self.tokens.token(token)?.is_none() {
                    return Err(StatusError::UnknownToken(*token));
                }
            }
            MessageBody::TokenIssue {
                shorthand, amount, ..
            } => {
                let address = Address::token(&msg.from, shorthand);
                self.tokens.check_issue(&address, &msg.from, *amount)?;
            }
            MessageBody::Candidate { .. } => {}
            MessageBody::CancelCandidate => {
                if self.dpos.candidate(&msg.from)?.is_none() {
                    return Err(StatusError::UnknownCandidate(msg.from));
                }
            }
            MessageBody::Vote { to } => {
                if self.dpos.candidate(to)?.is_none() {
                    return Err(StatusError::UnknownCandidate(*to));
                }
            }
            MessageBody::WorkReport { cycle, .. } => {
                if *cycle > ctx.cycle {
                    return Err(StatusError::FutureWork {
                        cycle: *cycle,
                        current: ctx.cycle,
                    });
                }
            }
            MessageBody::Contract {
                contract,
                method,
                args,
            } => {
                if self.tokens.token(contract)?.is_none() {
                    return Err(StatusError::UnknownToken(*contract));
                }
                ContractMethod::from_name(method)
                    .ok_or_else(|| StatusError::UnknownMethod(method.clone()))?
                    .check_args(args)?;
            }
            MessageBody::Coinbase { .. } => return Err(StatusError::UnexpectedCoinbase),
        }
        Ok(())
    }

    /// Stage one message's effects.
    fn apply_message(
        &mut self,
        msg: &Message,
        ctx: &ExecContext,
        config: &ChainConfig,
    ) -> StatusResult<()> {
        if let MessageBody::Coinbase { to, amount } = &msg.body {
            return self
                .accounts
                .to_message(to, &MAIN_TOKEN, *amount, ctx, msg.hash);
        }

        self.check_body(msg, ctx)?;
        let charges = charges(msg, config)?;
        self.accounts.from_message(msg, &charges, ctx)?;

        match &msg.body {
            MessageBody::Transfer { to, token, amount } => {
                self.accounts.to_message(to, token, *amount, ctx, msg.hash)?;
            }
            MessageBody::TokenIssue {
                name,
                shorthand,
                increase_allowed,
                amount,
            } => {
                let address = Address::token(&msg.from, shorthand);
                self.tokens.issue(TokenRecord {
                    address,
                    issuer: msg.from,
                    name: name.clone(),
                    shorthand: shorthand.clone(),
                    increase_allowed: *increase_allowed,
                    issuances: vec![Issuance {
                        height: ctx.height,
                        amount: *amount,
                        message: msg.hash,
                    }],
                })?;
                self.accounts
                    .to_message(&msg.from, &address, *amount, ctx, msg.hash)?;
            }
            MessageBody::Candidate { peer_id } => {
                self.dpos.register(&msg.from, peer_id, ctx.height)?;
            }
            MessageBody::CancelCandidate => {
                self.dpos.cancel(&msg.from)?;
            }
            MessageBody::Vote { to } => {
                self.dpos.set_vote(&msg.from, to);
            }
            MessageBody::WorkReport { cycle, work } => {
                self.accounts.work_message(&msg.from, *cycle, *work, ctx)?;
            }
            MessageBody::Contract { .. } => {}
            MessageBody::Coinbase { .. } => return Err(StatusError::UnexpectedCoinbase),
        }
        Ok(())
    }

    fn stage_block(
        &mut self,
        messages: &[Message],
        ctx: &ExecContext,
        effects: &BlockEffects<'_>,
        config: &ChainConfig,
    ) -> StatusResult<()> {
        for msg in messages {
            if let Err(e) = self.apply_message(msg, ctx, config) {
                debug!(hash = %short_hex(&msg.hash), error = %e, "message failed to apply");
                return Err(e);
            }
        }

        if effects.minted > 0 {
            let circulation = self.tokens.circulation()?;
            let remaining = config.total_circulation.saturating_sub(circulation);
            if effects.minted > remaining {
                return Err(StatusError::CirculationCap {
                    minted: effects.minted,
                    remaining,
                });
            }
            self.tokens.set_circulation(circulation + effects.minted);
        }

        self.dpos.add_mint(ctx.cycle, &ctx.signer)?;
        if let Some(supers) = effects.elected {
            self.dpos.set_supers(supers)?;
        }
        self.dpos.set_confirmed(ctx.confirmed);
        Ok(())
    }

    fn stage_genesis(
        &mut self,
        messages: &[Message],
        ctx: &ExecContext,
        config: &ChainConfig,
    ) -> StatusResult<()> {
        for msg in messages {
            self.apply_message(msg, ctx, config)?;
        }
        self.tokens.issue(TokenRecord {
            address: MAIN_TOKEN,
            issuer: Address::ZERO,
            name: config.main_token_name.clone(),
            shorthand: config.main_token_shorthand.clone(),
            increase_allowed: false,
            issuances: vec![Issuance {
                height: 0,
                amount: config.pre_circulation,
                message: ZERO_HASH,
            }],
        })?;
        self.tokens.set_circulation(config.pre_circulation);
        self.dpos.set_confirmed(0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub struct Status {
    config: Arc<ChainConfig>,
    stores: RwLock<Stores>,
}

impl Status {
    pub fn new(
        config: Arc<ChainConfig>,
        accounts: Box<dyn TrieStore>,
        dpos: Box<dyn TrieStore>,
        tokens: Box<dyn TrieStore>,
    ) -> Self {
        Self {
            config,
            stores: RwLock::new(Stores {
                accounts: AccountStatus::new(accounts),
                dpos: DposStatus::new(dpos),
                tokens: TokenStatus::new(tokens),
            }),
        }
    }

    /// Status over the `trie_account`, `trie_dpos` and `trie_token` trees
    /// of `db`, positioned at the empty roots.
    pub fn open(db: &ChainDb, config: Arc<ChainConfig>) -> StatusResult<Self> {
        Ok(Self::new(
            config,
            Box::new(SledTrie::new(db.open_tree("trie_account")?)),
            Box::new(SledTrie::new(db.open_tree("trie_dpos")?)),
            Box::new(SledTrie::new(db.open_tree("trie_token")?)),
        ))
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    // -- Roots --------------------------------------------------------------

    pub fn roots(&self) -> Roots {
        self.stores.read().roots()
    }

    /// Re-point all three tries. Staged writes are dropped.
    pub fn set_roots(&self, roots: &Roots) -> StatusResult<()> {
        self.stores.write().set_roots(roots)
    }

    // -- Reads --------------------------------------------------------------

    pub fn account(&self, address: &Address, confirmed: u64) -> StatusResult<Account> {
        self.stores.read().accounts.account(address, confirmed)
    }

    pub fn nonce(&self, address: &Address) -> StatusResult<u64> {
        self.stores.read().accounts.nonce(address)
    }

    pub fn spendable(&self, address: &Address, token: &Address, confirmed: u64) -> StatusResult<u64> {
        Ok(self.account(address, confirmed)?.spendable(token))
    }

    pub fn total_work(&self, cycle: u64) -> StatusResult<u64> {
        self.stores.read().accounts.total_work(cycle)
    }

    pub fn work_of(&self, address: &Address, cycle: u64) -> StatusResult<u64> {
        self.stores.read().accounts.work_of(address, cycle)
    }

    pub fn candidate(&self, signer: &Address) -> StatusResult<Option<CandidateRecord>> {
        self.stores.read().dpos.candidate(signer)
    }

    pub fn candidates(&self) -> StatusResult<Vec<CandidateRecord>> {
        self.stores.read().dpos.candidates()
    }

    pub fn votes(&self) -> StatusResult<Vec<(Address, Address)>> {
        self.stores.read().dpos.votes()
    }

    pub fn supers(&self, cycle: u64) -> StatusResult<Option<Supers>> {
        self.stores.read().dpos.supers(cycle)
    }

    pub fn mint_count(&self, cycle: u64, signer: &Address) -> StatusResult<u64> {
        self.stores.read().dpos.mint_count(cycle, signer)
    }

    /// Confirmed height as recorded in the DPoS trie.
    pub fn confirmed_record(&self) -> StatusResult<u64> {
        self.stores.read().dpos.confirmed()
    }

    pub fn token(&self, address: &Address) -> StatusResult<Option<TokenRecord>> {
        self.stores.read().tokens.token(address)
    }

    pub fn tokens(&self) -> StatusResult<Vec<TokenRecord>> {
        self.stores.read().tokens.tokens()
    }

    pub fn circulation(&self) -> StatusResult<u64> {
        self.stores.read().tokens.circulation()
    }

    /// Run a read-only contract method against token `contract`.
    pub fn call_contract(
        &self,
        contract: &Address,
        method: &str,
        args: &[u8],
        confirmed: u64,
    ) -> StatusResult<ContractValue> {
        let method = ContractMethod::from_name(method)
            .ok_or_else(|| StatusError::UnknownMethod(method.to_string()))?;
        let stores = self.stores.read();
        let record = stores
            .tokens
            .token(contract)?
            .ok_or(StatusError::UnknownToken(*contract))?;
        method.call(&ContractCall {
            record: &record,
            args,
            accounts: &stores.accounts,
            confirmed,
        })
    }

    // -- Validation ---------------------------------------------------------

    /// Check a message against current state without changing it.
    ///
    /// `strict` requires the nonce to be exactly the next one, as block
    /// inclusion does; otherwise any unused nonce passes.
    pub fn check_message(&self, msg: &Message, ctx: &ExecContext, strict: bool) -> StatusResult<()> {
        let stores = self.stores.read();
        stores.check_body(msg, ctx)?;
        let charges = charges(msg, &self.config)?;
        stores
            .accounts
            .check_from(msg, &charges, ctx.confirmed, strict)
    }

    // -- Application --------------------------------------------------------

    /// Apply a validated block's messages and commit. On error nothing is
    /// committed and the roots are those from before the call.
    pub fn apply_block(
        &self,
        messages: &[Message],
        ctx: &ExecContext,
        effects: &BlockEffects<'_>,
    ) -> StatusResult<Roots> {
        let mut stores = self.stores.write();
        if let Err(e) = stores.stage_block(messages, ctx, effects, &self.config) {
            stores.revert();
            return Err(e);
        }
        stores.commit()
    }

    /// Stage `messages` in order, then drop everything staged. On failure
    /// returns the index of the first message that did not apply.
    pub fn dry_run(&self, messages: &[Message], ctx: &ExecContext) -> Result<(), (usize, StatusError)> {
        let mut stores = self.stores.write();
        let mut result = Ok(());
        for (i, msg) in messages.iter().enumerate() {
            if let Err(e) = stores.apply_message(msg, ctx, &self.config) {
                result = Err((i, e));
                break;
            }
        }
        stores.revert();
        result
    }

    /// Apply the genesis block: allocations, bootstrap candidates and the
    /// main-token record.
    pub fn apply_genesis(&self, messages: &[Message], ctx: &ExecContext) -> StatusResult<Roots> {
        let mut stores = self.stores.write();
        if let Err(e) = stores.stage_genesis(messages, ctx, &self.config) {
            stores.revert();
            return Err(e);
        }
        stores.commit()
    }
}

impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Status").field("roots", &self.roots()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::crypto::KestrelKeypair;
    use crate::message::MessageBuilder;

    fn kp(seed: u8) -> KestrelKeypair {
        KestrelKeypair::from_seed(&[seed; 32])
    }

    fn addr(seed: u8) -> Address {
        Address::from(kp(seed).public_key())
    }

    fn config() -> Arc<ChainConfig> {
        Arc::new(ChainConfig {
            token_issue_cost: 100,
            pre_circulation: 10_000,
            total_circulation: 20_000,
            ..ChainConfig::default()
        })
    }

    fn ctx(height: u64, confirmed: u64) -> ExecContext {
        ExecContext {
            height,
            time: 0,
            cycle: 0,
            confirmed,
            signer: addr(9),
        }
    }

    /// Status with 10 000 for address 1 and a candidate at address 5.
    fn genesis_status() -> Status {
        let db = ChainDb::open_temporary().unwrap();
        let status = Status::open(&db, config()).unwrap();
        let messages = vec![
            MessageBuilder::coinbase(addr(1), 10_000, 0, 0),
            MessageBuilder::candidate("peer-5")
                .nonce(1)
                .build_unsigned(addr(5)),
        ];
        status.apply_genesis(&messages, &ctx(0, 0)).unwrap();
        status
    }

    #[test]
    fn genesis_sets_balances_candidates_and_main_token() {
        let s = genesis_status();
        assert_eq!(s.spendable(&addr(1), &MAIN_TOKEN, 0).unwrap(), 10_000);
        assert!(s.candidate(&addr(5)).unwrap().is_some());
        assert_eq!(s.nonce(&addr(5)).unwrap(), 1);
        assert_eq!(s.circulation().unwrap(), 10_000);
        let main = s.token(&MAIN_TOKEN).unwrap().unwrap();
        assert_eq!(main.total_supply(), 10_000);
        assert_ne!(s.roots(), Roots::EMPTY);
    }

    #[test]
    fn transfer_moves_funds_after_confirmation() {
        let s = genesis_status();
        let msg = MessageBuilder::transfer(addr(2), MAIN_TOKEN, 400)
            .nonce(1)
            .fee(5)
            .sign(&kp(1));
        s.apply_block(&[msg], &ctx(1, 0), &BlockEffects::default())
            .unwrap();

        assert_eq!(s.spendable(&addr(1), &MAIN_TOKEN, 0).unwrap(), 9_595);
        assert_eq!(s.spendable(&addr(2), &MAIN_TOKEN, 0).unwrap(), 0);
        assert_eq!(s.spendable(&addr(2), &MAIN_TOKEN, 1).unwrap(), 400);
        assert_eq!(s.mint_count(0, &addr(9)).unwrap(), 1);
    }

    #[test]
    fn failed_block_leaves_roots_untouched() {
        let s = genesis_status();
        let before = s.roots();
        let good = MessageBuilder::transfer(addr(2), MAIN_TOKEN, 1)
            .nonce(1)
            .sign(&kp(1));
        let bad = MessageBuilder::transfer(addr(1), MAIN_TOKEN, 1)
            .nonce(1)
            .sign(&kp(3));
        assert!(matches!(
            s.apply_block(&[good, bad], &ctx(1, 0), &BlockEffects::default()),
            Err(StatusError::InsufficientBalance { .. })
        ));
        assert_eq!(s.roots(), before);
        assert_eq!(s.nonce(&addr(1)).unwrap(), 0);
    }

    #[test]
    fn vote_requires_registered_candidate() {
        let s = genesis_status();
        let bad = MessageBuilder::vote(addr(6)).nonce(1).sign(&kp(1));
        assert!(matches!(
            s.check_message(&bad, &ctx(1, 0), true),
            Err(StatusError::UnknownCandidate(_))
        ));
        let good = MessageBuilder::vote(addr(5)).nonce(1).sign(&kp(1));
        s.apply_block(&[good], &ctx(1, 0), &BlockEffects::default())
            .unwrap();
        assert_eq!(s.votes().unwrap(), vec![(addr(1), addr(5))]);
    }

    #[test]
    fn token_issue_charges_cost_and_credits_issuer() {
        let s = genesis_status();
        let msg = MessageBuilder::token_issue("Gold", "GLD", true, 1_000)
            .nonce(1)
            .fee(10)
            .sign(&kp(1));
        s.apply_block(&[msg], &ctx(1, 1), &BlockEffects::default())
            .unwrap();

        let gold = Address::token(&addr(1), "GLD");
        assert_eq!(s.spendable(&addr(1), &MAIN_TOKEN, 1).unwrap(), 10_000 - 110);
        assert_eq!(s.spendable(&addr(1), &gold, 1).unwrap(), 1_000);
        assert_eq!(
            s.call_contract(&gold, "total_supply", &[], 1).unwrap(),
            ContractValue::Amount(1_000)
        );
        assert_eq!(
            s.call_contract(&gold, "balance_of", addr(1).as_bytes(), 1)
                .unwrap(),
            ContractValue::Amount(1_000)
        );
    }

    #[test]
    fn contract_message_only_pays_fee() {
        let s = genesis_status();
        let msg = MessageBuilder::contract(MAIN_TOKEN, "name", Vec::new())
            .nonce(1)
            .fee(3)
            .sign(&kp(1));
        s.apply_block(&[msg], &ctx(1, 1), &BlockEffects::default())
            .unwrap();
        assert_eq!(s.spendable(&addr(1), &MAIN_TOKEN, 1).unwrap(), 9_997);

        let unknown = MessageBuilder::contract(MAIN_TOKEN, "mint", Vec::new())
            .nonce(2)
            .sign(&kp(1));
        assert!(matches!(
            s.check_message(&unknown, &ctx(2, 1), true),
            Err(StatusError::UnknownMethod(_))
        ));
    }

    #[test]
    fn minting_respects_total_circulation() {
        let s = genesis_status();
        let over = BlockEffects {
            elected: None,
            minted: 10_001,
        };
        assert!(matches!(
            s.apply_block(&[], &ctx(1, 0), &over),
            Err(StatusError::CirculationCap { remaining: 10_000, .. })
        ));
        let ok = BlockEffects {
            elected: None,
            minted: 500,
        };
        s.apply_block(&[], &ctx(1, 0), &ok).unwrap();
        assert_eq!(s.circulation().unwrap(), 10_500);
    }

    #[test]
    fn set_roots_restores_prior_state() {
        let s = genesis_status();
        let before = s.roots();
        let msg = MessageBuilder::cancel_candidate().nonce(2).sign(&kp(5));
        s.apply_block(&[msg], &ctx(1, 0), &BlockEffects::default())
            .unwrap();
        assert!(s.candidate(&addr(5)).unwrap().is_none());

        s.set_roots(&before).unwrap();
        assert!(s.candidate(&addr(5)).unwrap().is_some());
        assert_eq!(s.roots(), before);
    }

    /// Trie whose commits fail while `fail` is set.
    struct FlakyTrie {
        inner: SledTrie,
        fail: Arc<AtomicBool>,
    }

    impl TrieStore for FlakyTrie {
        fn get(&self, key: &[u8]) -> crate::storage::TrieResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn update(&mut self, key: &[u8], value: Vec<u8>) {
            self.inner.update(key, value)
        }

        fn delete(&mut self, key: &[u8]) {
            self.inner.delete(key)
        }

        fn root(&self) -> crate::crypto::Hash {
            self.inner.root()
        }

        fn set_root(&mut self, root: crate::crypto::Hash) -> crate::storage::TrieResult<()> {
            self.inner.set_root(root)
        }

        fn commit(&mut self) -> crate::storage::TrieResult<crate::crypto::Hash> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TrieError::Sled(sled::Error::Unsupported("disk full".into())));
            }
            self.inner.commit()
        }

        fn revert(&mut self) {
            self.inner.revert()
        }

        fn iter_prefix(&self, prefix: &[u8]) -> crate::storage::TrieResult<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.iter_prefix(prefix)
        }
    }

    #[test]
    fn failed_commit_restores_every_root() {
        let db = ChainDb::open_temporary().unwrap();
        let fail = Arc::new(AtomicBool::new(false));
        let s = Status::new(
            config(),
            Box::new(SledTrie::new(db.open_tree("a").unwrap())),
            Box::new(FlakyTrie {
                inner: SledTrie::new(db.open_tree("d").unwrap()),
                fail: fail.clone(),
            }),
            Box::new(SledTrie::new(db.open_tree("t").unwrap())),
        );
        let genesis = vec![MessageBuilder::coinbase(addr(1), 10_000, 0, 0)];
        s.apply_genesis(&genesis, &ctx(0, 0)).unwrap();
        let before = s.roots();

        let msg = MessageBuilder::transfer(addr(2), MAIN_TOKEN, 10)
            .nonce(1)
            .sign(&kp(1));
        fail.store(true, Ordering::SeqCst);
        let err = s
            .apply_block(std::slice::from_ref(&msg), &ctx(1, 0), &BlockEffects::default())
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(s.roots(), before);
        assert_eq!(s.nonce(&addr(1)).unwrap(), 0);

        fail.store(false, Ordering::SeqCst);
        s.apply_block(&[msg], &ctx(1, 0), &BlockEffects::default())
            .unwrap();
        assert_eq!(s.nonce(&addr(1)).unwrap(), 1);
    }

    #[test]
    fn readers_never_see_staged_writes() {
        let s = Arc::new(genesis_status());
        let msg = MessageBuilder::transfer(addr(2), MAIN_TOKEN, 10)
            .nonce(1)
            .sign(&kp(1));

        let stager = {
            let s = s.clone();
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    s.dry_run(std::slice::from_ref(&msg), &ctx(1, 0)).unwrap();
                }
            })
        };
        while !stager.is_finished() {
            assert_eq!(s.nonce(&addr(1)).unwrap(), 0);
            assert_eq!(s.spendable(&addr(2), &MAIN_TOKEN, 1).unwrap(), 0);
        }
        stager.join().unwrap();
        assert_eq!(s.nonce(&addr(1)).unwrap(), 0);
    }

    #[test]
    fn charges_merge_main_token_amount_and_fee() {
        let cfg = config();
        let msg = MessageBuilder::transfer(addr(2), MAIN_TOKEN, 50)
            .nonce(1)
            .fee(2)
            .sign(&kp(1));
        assert_eq!(charges(&msg, &cfg).unwrap(), vec![(MAIN_TOKEN, 52)]);

        let issue = MessageBuilder::token_issue("Gold", "GLD", false, 1)
            .nonce(1)
            .fee(2)
            .sign(&kp(1));
        assert_eq!(charges(&issue, &cfg).unwrap(), vec![(MAIN_TOKEN, 102)]);
    }
}
