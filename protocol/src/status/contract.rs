//! Read-only token contract methods.
//!
//! Methods are resolved by name through a fixed table to a
//! [`ContractMethod`], and each method maps to one typed handler. Nothing
//! here mutates state; a `Contract` message only pays its fee and bumps
//! the sender's nonce.

use std::fmt;

use super::account::AccountStatus;
use super::token::TokenRecord;
use super::{StatusError, StatusResult};
use crate::crypto::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractMethod {
    Name,
    Shorthand,
    TotalSupply,
    BalanceOf,
    Issuer,
    IncreaseAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractValue {
    Text(String),
    Amount(u64),
    Address(Address),
    Flag(bool),
}

impl fmt::Display for ContractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Amount(n) => write!(f, "{n}"),
            Self::Address(a) => write!(f, "{a}"),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

/// Everything a handler may look at.
pub struct ContractCall<'a> {
    pub record: &'a TokenRecord,
    pub args: &'a [u8],
    pub accounts: &'a AccountStatus,
    pub confirmed: u64,
}

type Handler = fn(&ContractCall<'_>) -> StatusResult<ContractValue>;

const METHODS: [(&str, ContractMethod); 6] = [
    ("name", ContractMethod::Name),
    ("shorthand", ContractMethod::Shorthand),
    ("total_supply", ContractMethod::TotalSupply),
    ("balance_of", ContractMethod::BalanceOf),
    ("issuer", ContractMethod::Issuer),
    ("increase_allowed", ContractMethod::IncreaseAllowed),
];

impl ContractMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        METHODS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, m)| *m)
    }

    pub fn name(self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, m)| *m == self)
            .map_or("", |(n, _)| n)
    }

    fn handler(self) -> Handler {
        match self {
            Self::Name => name,
            Self::Shorthand => shorthand,
            Self::TotalSupply => total_supply,
            Self::BalanceOf => balance_of,
            Self::Issuer => issuer,
            Self::IncreaseAllowed => increase_allowed,
        }
    }

    /// `balance_of` takes a 32-byte address; every other method takes no
    /// arguments.
    pub fn check_args(self, args: &[u8]) -> StatusResult<()> {
        let ok = match self {
            Self::BalanceOf => args.len() == 32,
            _ => args.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(StatusError::BadContractArgs {
                method: self.name(),
                len: args.len(),
            })
        }
    }

    pub fn call(self, call: &ContractCall<'_>) -> StatusResult<ContractValue> {
        self.check_args(call.args)?;
        (self.handler())(call)
    }
}

fn name(call: &ContractCall<'_>) -> StatusResult<ContractValue> {
    Ok(ContractValue::Text(call.record.name.clone()))
}

fn shorthand(call: &ContractCall<'_>) -> StatusResult<ContractValue> {
    Ok(ContractValue::Text(call.record.shorthand.clone()))
}

fn total_supply(call: &ContractCall<'_>) -> StatusResult<ContractValue> {
    Ok(ContractValue::Amount(call.record.total_supply()))
}

fn balance_of(call: &ContractCall<'_>) -> StatusResult<ContractValue> {
    let holder = <[u8; 32]>::try_from(call.args)
        .map(Address)
        .map_err(|_| StatusError::BadContractArgs {
            method: "balance_of",
            len: call.args.len(),
        })?;
    let account = call.accounts.account(&holder, call.confirmed)?;
    Ok(ContractValue::Amount(account.spendable(&call.record.address)))
}

fn issuer(call: &ContractCall<'_>) -> StatusResult<ContractValue> {
    Ok(ContractValue::Address(call.record.issuer))
}

fn increase_allowed(call: &ContractCall<'_>) -> StatusResult<ContractValue> {
    Ok(ContractValue::Flag(call.record.increase_allowed))
}
