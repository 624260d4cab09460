//! # Account Status
//!
//! Per-account balances with two-phase settlement.
//!
//! A debit does not touch `balance` right away. It raises `locked_out` and
//! records an outgoing journal entry at the block height; a credit raises
//! `locked_in` and records an incoming entry. Once the chain's confirmed
//! height reaches the entry's height, [`Account::update_locked`] moves the
//! amount for real:
//!
//! ```text
//! outgoing:  locked_out -= amt   balance -= amt
//! incoming:  locked_in  -= amt   balance += amt
//! ```
//!
//! Spendable funds are `balance - locked_out`, so a debit is visible the
//! moment it is applied while a credit is only spendable once final.
//! Settlement is lazy: it happens whenever an account is read with a
//! confirmed height, never as a sweep.
//!
//! ## Trie keys
//!
//! | Key                 | Value                 |
//! |---------------------|-----------------------|
//! | `a/` + address      | `bincode(Account)`    |
//! | `w/` + cycle (BE)   | total work, u64 BE    |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{decode, encode, ExecContext, StatusError, StatusResult};
use crate::crypto::{Address, Hash};
use crate::message::Message;
use crate::storage::TrieStore;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// One token position of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub balance: u64,
    /// Debited but not yet final.
    pub locked_out: u64,
    /// Credited but not yet final.
    pub locked_in: u64,
}

impl TokenBalance {
    pub fn spendable(&self) -> u64 {
        self.balance.saturating_sub(self.locked_out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub token: Address,
    pub amount: u64,
    /// Message that caused the movement.
    pub message: Hash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub nonce: u64,
    pub tokens: BTreeMap<Address, TokenBalance>,
    /// Highest confirmed height this record has been settled against.
    pub confirmed_height: u64,
    /// Reported work per cycle.
    pub work: BTreeMap<u64, u64>,
    pub outgoing: BTreeMap<u64, Vec<JournalEntry>>,
    pub incoming: BTreeMap<u64, Vec<JournalEntry>>,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn balance(&self, token: &Address) -> TokenBalance {
        self.tokens.get(token).copied().unwrap_or_default()
    }

    pub fn spendable(&self, token: &Address) -> u64 {
        self.balance(token).spendable()
    }

    /// Settle every journal entry at or below `confirmed`.
    pub fn update_locked(&mut self, confirmed: u64) {
        let Some(split) = confirmed.checked_add(1) else {
            return;
        };

        let pending_out = self.outgoing.split_off(&split);
        let settled_out = std::mem::replace(&mut self.outgoing, pending_out);
        for entry in settled_out.into_values().flatten() {
            let position = self.tokens.entry(entry.token).or_default();
            position.locked_out = position.locked_out.saturating_sub(entry.amount);
            position.balance = position.balance.saturating_sub(entry.amount);
        }

        let pending_in = self.incoming.split_off(&split);
        let settled_in = std::mem::replace(&mut self.incoming, pending_in);
        for entry in settled_in.into_values().flatten() {
            let position = self.tokens.entry(entry.token).or_default();
            position.locked_in = position.locked_in.saturating_sub(entry.amount);
            position.balance = position.balance.saturating_add(entry.amount);
        }

        self.confirmed_height = self.confirmed_height.max(confirmed);
    }

    fn check_nonce(&self, got: u64, strict: bool) -> StatusResult<()> {
        let expected = self.nonce.saturating_add(1);
        if strict && got != expected {
            return Err(StatusError::InvalidNonce {
                address: self.address,
                expected,
                got,
            });
        }
        if !strict && got <= self.nonce {
            return Err(StatusError::StaleNonce {
                address: self.address,
                current: self.nonce,
                got,
            });
        }
        Ok(())
    }

    fn check_funds(&self, charges: &[(Address, u64)]) -> StatusResult<()> {
        for (token, need) in charges {
            let have = self.spendable(token);
            if have < *need {
                return Err(StatusError::InsufficientBalance {
                    address: self.address,
                    token: *token,
                    need: *need,
                    have,
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AccountStatus
// ---------------------------------------------------------------------------

const ACCOUNT_PREFIX: &[u8] = b"a/";
const WORK_PREFIX: &[u8] = b"w/";

fn account_key(address: &Address) -> Vec<u8> {
    [ACCOUNT_PREFIX, address.as_bytes()].concat()
}

fn work_key(cycle: u64) -> Vec<u8> {
    [WORK_PREFIX, &cycle.to_be_bytes()].concat()
}

pub struct AccountStatus {
    trie: Box<dyn TrieStore>,
}

impl AccountStatus {
    pub fn new(trie: Box<dyn TrieStore>) -> Self {
        Self { trie }
    }

    fn load(&self, address: &Address) -> StatusResult<Account> {
        match self.trie.get(&account_key(address))? {
            Some(bytes) => decode(&bytes),
            None => Ok(Account::new(*address)),
        }
    }

    fn save(&mut self, account: &Account) -> StatusResult<()> {
        let bytes = encode(account)?;
        self.trie.update(&account_key(&account.address), bytes);
        Ok(())
    }

    /// The account as seen at `confirmed`: matured journal entries are
    /// settled in the returned copy.
    pub fn account(&self, address: &Address, confirmed: u64) -> StatusResult<Account> {
        let mut account = self.load(address)?;
        account.update_locked(confirmed);
        Ok(account)
    }

    pub fn nonce(&self, address: &Address) -> StatusResult<u64> {
        Ok(self.load(address)?.nonce)
    }

    /// Nonce and funds check for a sender without mutating anything.
    pub fn check_from(
        &self,
        msg: &Message,
        charges: &[(Address, u64)],
        confirmed: u64,
        strict: bool,
    ) -> StatusResult<()> {
        let account = self.account(&msg.from, confirmed)?;
        account.check_nonce(msg.nonce, strict)?;
        account.check_funds(charges)
    }

    /// Debit the sender: advance the nonce and lock every charge.
    pub fn from_message(
        &mut self,
        msg: &Message,
        charges: &[(Address, u64)],
        ctx: &ExecContext,
    ) -> StatusResult<()> {
        let mut account = self.account(&msg.from, ctx.confirmed)?;
        account.check_nonce(msg.nonce, true)?;
        account.check_funds(charges)?;

        for (token, amount) in charges {
            if *amount == 0 {
                continue;
            }
            let position = account.tokens.entry(*token).or_default();
            position.locked_out = position
                .locked_out
                .checked_add(*amount)
                .ok_or(StatusError::Overflow("locked_out"))?;
            account
                .outgoing
                .entry(ctx.height)
                .or_default()
                .push(JournalEntry {
                    token: *token,
                    amount: *amount,
                    message: msg.hash,
                });
        }
        account.nonce = msg.nonce;
        self.save(&account)
    }

    /// Credit `to` with `amount` of `token`, pending finality.
    pub fn to_message(
        &mut self,
        to: &Address,
        token: &Address,
        amount: u64,
        ctx: &ExecContext,
        message: Hash,
    ) -> StatusResult<()> {
        let mut account = self.account(to, ctx.confirmed)?;
        let position = account.tokens.entry(*token).or_default();
        position.locked_in = position
            .locked_in
            .checked_add(amount)
            .ok_or(StatusError::Overflow("locked_in"))?;
        account
            .incoming
            .entry(ctx.height)
            .or_default()
            .push(JournalEntry {
                token: *token,
                amount,
                message,
            });
        self.save(&account)
    }

    /// Record work reported by `from` for `cycle`, both on the account and
    /// in the network total.
    pub fn work_message(
        &mut self,
        from: &Address,
        cycle: u64,
        work: u64,
        ctx: &ExecContext,
    ) -> StatusResult<()> {
        let mut account = self.account(from, ctx.confirmed)?;
        let slot = account.work.entry(cycle).or_default();
        *slot = slot.checked_add(work).ok_or(StatusError::Overflow("work"))?;
        self.save(&account)?;

        let total = self
            .total_work(cycle)?
            .checked_add(work)
            .ok_or(StatusError::Overflow("total work"))?;
        self.trie.update(&work_key(cycle), total.to_be_bytes().to_vec());
        Ok(())
    }

    pub fn work_of(&self, address: &Address, cycle: u64) -> StatusResult<u64> {
        Ok(self
            .load(address)?
            .work
            .get(&cycle)
            .copied()
            .unwrap_or(0))
    }

    pub fn total_work(&self, cycle: u64) -> StatusResult<u64> {
        match self.trie.get(&work_key(cycle))? {
            Some(bytes) => super::decode_u64(&bytes),
            None => Ok(0),
        }
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KestrelKeypair, MAIN_TOKEN};
    use crate::message::MessageBuilder;
    use crate::storage::SledTrie;

    fn status() -> AccountStatus {
        let db = sled::Config::new().temporary(true).open().unwrap();
        AccountStatus::new(Box::new(SledTrie::new(db.open_tree("acct").unwrap())))
    }

    fn ctx(height: u64, confirmed: u64) -> ExecContext {
        ExecContext {
            height,
            time: height * 10,
            cycle: 0,
            confirmed,
            signer: Address([9u8; 32]),
        }
    }

    fn alice() -> KestrelKeypair {
        KestrelKeypair::from_seed(&[1u8; 32])
    }

    fn alice_addr() -> Address {
        Address::from(alice().public_key())
    }

    fn fund(status: &mut AccountStatus, who: &Address, amount: u64) {
        status
            .to_message(who, &MAIN_TOKEN, amount, &ctx(0, 0), [0u8; 32])
            .unwrap();
    }

    #[test]
    fn credit_is_locked_until_confirmed() {
        let mut s = status();
        let who = alice_addr();
        s.to_message(&who, &MAIN_TOKEN, 500, &ctx(5, 0), [1u8; 32])
            .unwrap();

        let before = s.account(&who, 4).unwrap();
        assert_eq!(before.balance(&MAIN_TOKEN).locked_in, 500);
        assert_eq!(before.spendable(&MAIN_TOKEN), 0);

        let after = s.account(&who, 5).unwrap();
        assert_eq!(after.balance(&MAIN_TOKEN).balance, 500);
        assert_eq!(after.balance(&MAIN_TOKEN).locked_in, 0);
        assert!(after.incoming.is_empty());
    }

    #[test]
    fn debit_locks_then_settles() {
        let mut s = status();
        let who = alice_addr();
        fund(&mut s, &who, 1_000);

        let msg = MessageBuilder::transfer(Address([2u8; 32]), MAIN_TOKEN, 300)
            .nonce(1)
            .fee(10)
            .sign(&alice());
        s.from_message(&msg, &[(MAIN_TOKEN, 310)], &ctx(3, 0))
            .unwrap();

        let pending = s.account(&who, 2).unwrap();
        let pos = pending.balance(&MAIN_TOKEN);
        assert_eq!((pos.balance, pos.locked_out), (1_000, 310));
        assert_eq!(pending.spendable(&MAIN_TOKEN), 690);
        assert_eq!(pending.nonce, 1);

        let settled = s.account(&who, 3).unwrap();
        let pos = settled.balance(&MAIN_TOKEN);
        assert_eq!((pos.balance, pos.locked_out), (690, 0));
    }

    #[test]
    fn strict_nonce_must_be_next() {
        let mut s = status();
        fund(&mut s, &alice_addr(), 100);
        let msg = MessageBuilder::vote(Address([2u8; 32]))
            .nonce(2)
            .sign(&alice());
        assert!(matches!(
            s.from_message(&msg, &[], &ctx(1, 0)),
            Err(StatusError::InvalidNonce { expected: 1, got: 2, .. })
        ));
        s.check_from(&msg, &[], 0, false).unwrap();
    }

    #[test]
    fn non_strict_rejects_used_nonce() {
        let mut s = status();
        fund(&mut s, &alice_addr(), 100);
        let first = MessageBuilder::vote(Address([2u8; 32]))
            .nonce(1)
            .sign(&alice());
        s.from_message(&first, &[], &ctx(1, 0)).unwrap();
        assert!(matches!(
            s.check_from(&first, &[], 0, false),
            Err(StatusError::StaleNonce { current: 1, .. })
        ));
    }

    #[test]
    fn insufficient_balance_is_rejected_without_mutation() {
        let mut s = status();
        let who = alice_addr();
        fund(&mut s, &who, 50);
        let msg = MessageBuilder::transfer(Address([2u8; 32]), MAIN_TOKEN, 100)
            .nonce(1)
            .sign(&alice());
        assert!(matches!(
            s.from_message(&msg, &[(MAIN_TOKEN, 100)], &ctx(1, 0)),
            Err(StatusError::InsufficientBalance { need: 100, have: 50, .. })
        ));
        assert_eq!(s.nonce(&who).unwrap(), 0);
    }

    #[test]
    fn unconfirmed_credit_is_not_spendable() {
        let mut s = status();
        let who = alice_addr();
        s.to_message(&who, &MAIN_TOKEN, 100, &ctx(4, 0), [1u8; 32])
            .unwrap();
        let msg = MessageBuilder::transfer(Address([2u8; 32]), MAIN_TOKEN, 10)
            .nonce(1)
            .sign(&alice());
        assert!(s.check_from(&msg, &[(MAIN_TOKEN, 10)], 3, true).is_err());
        s.check_from(&msg, &[(MAIN_TOKEN, 10)], 4, true).unwrap();
    }

    #[test]
    fn work_accumulates_per_cycle() {
        let mut s = status();
        let who = alice_addr();
        s.work_message(&who, 3, 10, &ctx(1, 0)).unwrap();
        s.work_message(&who, 3, 5, &ctx(2, 0)).unwrap();
        s.work_message(&Address([7u8; 32]), 3, 20, &ctx(2, 0)).unwrap();
        assert_eq!(s.work_of(&who, 3).unwrap(), 15);
        assert_eq!(s.total_work(3).unwrap(), 35);
        assert_eq!(s.total_work(4).unwrap(), 0);
    }

    #[test]
    fn set_root_rewinds_balances() {
        let mut s = status();
        let who = alice_addr();
        fund(&mut s, &who, 10);
        let r1 = s.commit().unwrap();
        fund(&mut s, &who, 90);
        s.commit().unwrap();
        assert_eq!(s.account(&who, 0).unwrap().spendable(&MAIN_TOKEN), 100);

        s.set_root(r1).unwrap();
        assert_eq!(s.account(&who, 0).unwrap().spendable(&MAIN_TOKEN), 10);
    }

    #[test]
    fn update_locked_is_ordered_by_height() {
        let mut account = Account::new(Address([1u8; 32]));
        for h in [2u64, 5, 9] {
            account.incoming.entry(h).or_default().push(JournalEntry {
                token: MAIN_TOKEN,
                amount: h,
                message: [0u8; 32],
            });
            account.tokens.entry(MAIN_TOKEN).or_default().locked_in += h;
        }
        account.update_locked(5);
        assert_eq!(account.balance(&MAIN_TOKEN).balance, 7);
        assert_eq!(account.incoming.keys().copied().collect::<Vec<_>>(), vec![9]);
        assert_eq!(account.confirmed_height, 5);
    }
}
