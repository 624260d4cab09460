//! # CLI Interface
//!
//! Defines the command-line argument structure for `kestrel-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Kestrel block-producing node.
///
/// Runs the DPoS consensus core: produces blocks in this key's slots,
/// keeps the message pool, and exposes status and Prometheus metrics
/// over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "kestrel-node",
    about = "Kestrel block-producing node",
    version,
    propagate_version = true
)]
pub struct KestrelNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create a data directory with a fresh validator key and a devnet
    /// configuration in which that key is the only super.
    Init(InitArgs),
    /// Query the status endpoint of a running node.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node reads `config.toml` from the data directory.
    #[arg(long, short = 'c', env = "KESTREL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the chain database and the validator key.
    #[arg(long, short = 'd', env = "KESTREL_DATA_DIR", default_value = ".kestrel")]
    pub data_dir: PathBuf,

    /// Port for the status and Prometheus metrics endpoints.
    #[arg(long, env = "KESTREL_HTTP_PORT", default_value_t = 9742)]
    pub http_port: u16,

    /// Hex-encoded Ed25519 validator secret key.
    ///
    /// If not provided, the key is read from `validator.key` in the data
    /// directory.
    #[arg(long, env = "KESTREL_VALIDATOR_KEY", hide_env_values = true)]
    pub validator_key: Option<String>,

    /// Log output format.
    #[arg(long, env = "KESTREL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "KESTREL_DATA_DIR", default_value = ".kestrel")]
    pub data_dir: PathBuf,

    /// Peer identity advertised by the bootstrap candidate.
    #[arg(long, default_value = "local")]
    pub peer_id: String,

    /// Main-token amount allocated to the validator at genesis.
    #[arg(long, default_value_t = 1_000_000_000_000)]
    pub allocation: u64,

    /// Overwrite an existing configuration and key.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// HTTP endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9742")]
    pub url: String,
}
