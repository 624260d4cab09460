//! # Protocol Configuration & Constants
//!
//! Two kinds of knobs live here:
//!
//! - **Constants** that are part of the consensus encoding and never change
//!   without a hard fork (block version, field limits).
//! - **[`ChainConfig`]**, the network parameters every node must agree on
//!   (intervals, super-set size, circulation, genesis). It is built once at
//!   startup, validated, and passed by `Arc` into the chain, consensus and
//!   status constructors. Nothing reads it from ambient global state.
//!
//! [`NodeConfig`] bundles the chain parameters with local-only settings
//! (mempool limits) and is what the node loads from TOML.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Address;
use crate::mempool::MempoolConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Crate protocol version, reported by `kestrel-node version`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Header format version. Bump on any change to the header preimage.
pub const BLOCK_VERSION: u32 = 1;

/// Upper bound on a candidate's advertised peer identity.
pub const MAX_PEER_ID_LEN: usize = 128;

/// Upper bound on a token's display name.
pub const MAX_TOKEN_NAME_LEN: usize = 32;

/// Token shorthand length bounds (inclusive).
pub const MIN_SHORTHAND_LEN: usize = 2;
pub const MAX_SHORTHAND_LEN: usize = 8;

/// Upper bound on contract-call argument bytes.
pub const MAX_CONTRACT_ARGS_LEN: usize = 1024;

/// Producer poll period. The timer re-evaluates slot ownership on every
/// tick instead of sleeping until the slot; irregular wake-ups are fine.
pub const PRODUCER_TICK: Duration = Duration::from_secs(1);

/// Slots a devnet block may land past its parent: one day at the default
/// ten-second interval.
pub const DEVNET_MAX_SKIPPED_SLOTS: u64 = 8_640;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Genesis
// ---------------------------------------------------------------------------

/// A pre-allocated main-token balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub address: Address,
    pub amount: u64,
}

/// A candidate registered in the genesis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapCandidate {
    pub address: Address,
    pub peer_id: String,
}

/// Everything needed to build block 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Genesis timestamp in seconds. Must sit on a slot boundary.
    pub time: u64,
    pub allocations: Vec<Allocation>,
    pub candidates: Vec<BootstrapCandidate>,
}

// ---------------------------------------------------------------------------
// ChainConfig
// ---------------------------------------------------------------------------

/// Network parameters. Every node on a network must run with identical
/// values or blocks will not validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Length of an election cycle, in seconds.
    pub cycle_interval: u64,
    /// Length of one production slot, in seconds.
    pub block_interval: u64,
    /// Number of supers elected per cycle.
    pub super_size: usize,
    /// Minimum registered candidates for an election to succeed.
    pub min_candidates: usize,
    /// Slots a producer may skip past an absent leader. Zero means a block
    /// must land in exactly the next slot after its parent.
    pub max_skipped_slots: u64,
    /// Main-token supply allocated at genesis.
    pub pre_circulation: u64,
    /// Hard cap on main-token supply, rewards included.
    pub total_circulation: u64,
    /// Full per-block reward before work weighting.
    pub block_reward: u64,
    /// Main-token amount consumed by a token issuance.
    pub token_issue_cost: u64,
    /// Byte budget for the messages of one block.
    pub max_block_bytes: usize,
    pub main_token_name: String,
    pub main_token_shorthand: String,
    pub genesis: GenesisConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            cycle_interval: 86_400,
            block_interval: 10,
            super_size: 9,
            min_candidates: 7,
            max_skipped_slots: 0,
            pre_circulation: 0,
            total_circulation: 10_000_000_000_000_000,
            block_reward: 5_000_000_000,
            token_issue_cost: 1_000_000_000,
            max_block_bytes: 1 << 20,
            main_token_name: "Kestrel".to_string(),
            main_token_shorthand: "KES".to_string(),
            genesis: GenesisConfig {
                time: 1_700_006_400,
                allocations: Vec::new(),
                candidates: Vec::new(),
            },
        }
    }
}

impl ChainConfig {
    /// Single-producer development network: one candidate that is also
    /// the only allocation holder.
    ///
    /// Unlike [`Default`], the devnet relaxes the slot rule: with a single
    /// producer, a node restarted after downtime has no one to fill the
    /// missed slots, so blocks may land up to
    /// [`DEVNET_MAX_SKIPPED_SLOTS`] slots past their parent.
    pub fn devnet(producer: Address, peer_id: &str, allocation: u64) -> Self {
        Self {
            super_size: 1,
            min_candidates: 1,
            max_skipped_slots: DEVNET_MAX_SKIPPED_SLOTS,
            pre_circulation: allocation,
            genesis: GenesisConfig {
                allocations: vec![Allocation {
                    address: producer,
                    amount: allocation,
                }],
                candidates: vec![BootstrapCandidate {
                    address: producer,
                    peer_id: peer_id.to_string(),
                }],
                ..GenesisConfig::default()
            },
            ..Self::default()
        }
    }

    /// Distinct signers needed to advance the confirmed height: two thirds
    /// of the super set, plus one. Nine supers need seven.
    pub fn dpos_size(&self) -> usize {
        self.super_size * 2 / 3 + 1
    }

    /// Cycle a timestamp falls in.
    pub fn cycle_of(&self, time: u64) -> u64 {
        time / self.cycle_interval
    }

    /// Sum of genesis allocations, `None` on overflow.
    pub fn allocated(&self) -> Option<u64> {
        self.genesis
            .allocations
            .iter()
            .try_fold(0u64, |acc, a| acc.checked_add(a.amount))
    }

    /// Check internal consistency. Called by `Chain::open` before anything
    /// touches storage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.block_interval == 0 || self.cycle_interval == 0 {
            return invalid("intervals must be non-zero".into());
        }
        if self.cycle_interval % self.block_interval != 0 {
            return invalid(format!(
                "cycle_interval {} is not a multiple of block_interval {}",
                self.cycle_interval, self.block_interval
            ));
        }
        if self.genesis.time % self.block_interval != 0 {
            return invalid(format!(
                "genesis time {} is not on a slot boundary",
                self.genesis.time
            ));
        }
        if self.super_size == 0 || self.min_candidates == 0 {
            return invalid("super_size and min_candidates must be non-zero".into());
        }
        if self.pre_circulation > self.total_circulation {
            return invalid(format!(
                "pre_circulation {} exceeds total_circulation {}",
                self.pre_circulation, self.total_circulation
            ));
        }
        match self.allocated() {
            Some(sum) if sum == self.pre_circulation => {}
            Some(sum) => {
                return invalid(format!(
                    "genesis allocations sum to {sum}, expected {}",
                    self.pre_circulation
                ))
            }
            None => return invalid("genesis allocations overflow u64".into()),
        }
        if self.genesis.candidates.len() < self.min_candidates {
            return invalid(format!(
                "{} bootstrap candidates, need at least {}",
                self.genesis.candidates.len(),
                self.min_candidates
            ));
        }
        let mut seen = HashSet::with_capacity(self.genesis.candidates.len());
        if let Some(dup) = self
            .genesis
            .candidates
            .iter()
            .find(|c| !seen.insert(c.address))
        {
            return invalid(format!(
                "bootstrap candidate {} is listed twice",
                dup.address
            ));
        }
        if self.main_token_shorthand.len() < MIN_SHORTHAND_LEN
            || self.main_token_shorthand.len() > MAX_SHORTHAND_LEN
        {
            return invalid(format!(
                "main token shorthand {:?} has bad length",
                self.main_token_shorthand
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// On-disk node configuration (`config.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain: ChainConfig,
    pub mempool: MempoolConfig,
}

impl NodeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Read and parse a config file. Validation is left to the caller.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let rendered = self.to_toml_string()?;
        fs::write(path, rendered).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
