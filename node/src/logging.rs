//! # Structured Logging
//!
//! Sets up the `tracing` subscriber for `kestrel-node`. Everything goes to
//! stderr; `kestrel-node status` prints its report on stdout.
//!
//! Filter directives are taken from `KESTREL_LOG`, then `RUST_LOG`, then the
//! per-command defaults. A variable that fails to parse is skipped:
//!
//! ```text
//! KESTREL_LOG=kestrel_protocol::chain=debug,kestrel_protocol::producer=debug
//! ```
//!
//! Block insertion, confirmation and rollback are logged by
//! `kestrel_protocol::chain` at `info`. Missed slots and skipped messages
//! are `debug`. Long-running tasks run inside a [`node_span`] so every event
//! carries the producer address.

use std::path::Path;

use clap::ValueEnum;
use kestrel_protocol::crypto::Address;
use tracing::Span;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Node-specific filter variable. Wins over `RUST_LOG`.
pub const LOG_ENV: &str = "KESTREL_LOG";

/// Defaults for `kestrel-node run`. sled is noisy below `warn`.
pub const RUN_DIRECTIVES: &str =
    "kestrel_node=info,kestrel_protocol=info,tower_http=info,sled=warn";

/// Defaults for one-shot commands such as `init`.
pub const COMMAND_DIRECTIVES: &str = "kestrel_node=info,sled=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored output.
    Pretty,
    /// JSON lines, one object per event, with the enclosing node span.
    Json,
}

/// Picks the first directive string that parses, falling back to `defaults`.
fn select_filter(node_env: Option<&str>, rust_log: Option<&str>, defaults: &str) -> EnvFilter {
    [node_env, rust_log]
        .into_iter()
        .flatten()
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(defaults))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(defaults: &str, format: LogFormat) -> Result<(), TryInitError> {
    let node_env = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = select_filter(node_env.as_deref(), rust_log.as_deref(), defaults);

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()?,
    }

    tracing::debug!(?format, env = LOG_ENV, "logging initialized");
    Ok(())
}

/// Root span for the producer and HTTP tasks of a running node.
pub fn node_span(producer: &Address, data_dir: &Path) -> Span {
    tracing::info_span!("node", %producer, data_dir = %data_dir.display())
}
