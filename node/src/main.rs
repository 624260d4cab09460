// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Kestrel Node
//!
//! Entry point for the `kestrel-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the chain, runs the block
//! producer and serves the HTTP status/metrics endpoints.
//!
//! The binary supports four subcommands:
//!
//! - `run`     - start the node
//! - `init`    - create a data directory, validator key and devnet config
//! - `status`  - query a running node's status endpoint
//! - `version` - print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;
use tokio::sync::watch;
use tracing::Instrument;

use kestrel_protocol::chain::Chain;
use kestrel_protocol::config::{ChainConfig, NodeConfig, PROTOCOL_VERSION};
use kestrel_protocol::crypto::{Address, KestrelKeypair};
use kestrel_protocol::mempool::{Mempool, MempoolConfig};
use kestrel_protocol::producer::{BlockProducer, Tick};
use kestrel_protocol::storage::ChainDb;

use cli::{Commands, KestrelNodeCli};
use logging::LogFormat;
use metrics::{MetricsSink, NodeMetrics};

const CONFIG_FILE: &str = "config.toml";
const KEY_FILE: &str = "validator.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KestrelNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens the chain and runs the block producer and HTTP server until a
/// shutdown signal or a fatal production error.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::RUN_DIRECTIVES, args.log_format)
        .context("failed to initialize logging")?;

    // --- Configuration ---
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join(CONFIG_FILE));
    let node_config = NodeConfig::load(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let keypair = load_validator_key(&args)?;
    let producer_address = Address::from(keypair.public_key());

    tracing::info!(
        config = %config_path.display(),
        data_dir = %args.data_dir.display(),
        http_port = args.http_port,
        producer = %producer_address,
        "starting kestrel-node"
    );
    let span = logging::node_span(&producer_address, &args.data_dir);

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = ChainDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    // --- Chain, mempool, metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let mempool = Arc::new(Mempool::new(node_config.mempool.clone()));
    let sink = Arc::new(MetricsSink::new(mempool.clone(), node_metrics.clone()));
    let chain = Arc::new(
        Chain::open(db, Arc::new(node_config.chain))
            .context("failed to open chain")?
            .with_sink(sink),
    );
    node_metrics.refresh(&chain, &mempool);
    tracing::info!(
        height = chain.last_height(),
        confirmed = chain.confirmed_height(),
        "chain ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- HTTP server ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        producer: producer_address,
        chain: chain.clone(),
        mempool: mempool.clone(),
        metrics: node_metrics.clone(),
    };
    let http_addr = format!("0.0.0.0:{}", args.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", http_addr))?;
    tracing::info!("HTTP server listening on {}", http_addr);

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, api::create_router(app_state))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    }
    .instrument(span.clone()));

    // --- Block producer ---
    let producer = BlockProducer::new(chain.clone(), mempool.clone(), keypair);
    let observed = (chain.clone(), mempool.clone(), node_metrics.clone());
    let mut producer_task = tokio::spawn(async move {
        producer
            .run_with(shutdown_rx, move |tick| {
                let (chain, mempool, metrics) = &observed;
                match tick {
                    Ok(Tick::Produced { .. }) => metrics.blocks_produced_total.inc(),
                    Ok(_) => {}
                    Err(_) => metrics.insert_failures_total.inc(),
                }
                metrics.refresh(chain, mempool);
            })
            .await
    }
    .instrument(span));

    // --- Serve until shutdown ---
    let finished = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping producer");
            None
        }
        res = &mut producer_task => Some(res),
    };
    let _ = shutdown_tx.send(true);

    // An in-flight insert completes before the producer task returns.
    let produced = match finished {
        Some(res) => res,
        None => producer_task.await,
    };
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
        Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
    }

    chain.flush().context("failed to flush chain database")?;
    produced
        .context("block producer task panicked")?
        .context("block producer stopped on a fatal error")?;

    tracing::info!(height = chain.last_height(), "kestrel-node stopped");
    Ok(())
}

/// Reads the validator key from the flag/env value or the data directory.
fn load_validator_key(args: &cli::RunArgs) -> Result<KestrelKeypair> {
    let (hex, source) = match &args.validator_key {
        Some(hex) => (hex.clone(), "KESTREL_VALIDATOR_KEY".to_string()),
        None => {
            let path = args.data_dir.join(KEY_FILE);
            let hex = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read validator key {}", path.display()))?;
            (hex, path.display().to_string())
        }
    };
    KestrelKeypair::from_hex(&hex).with_context(|| format!("invalid validator key in {source}"))
}

/// Initializes a new data directory: validator key plus a devnet config in
/// which that key is the only candidate and allocation holder.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::COMMAND_DIRECTIVES, LogFormat::Pretty)
        .context("failed to initialize logging")?;

    let data_dir = &args.data_dir;
    let config_path = data_dir.join(CONFIG_FILE);
    let key_path = data_dir.join(KEY_FILE);
    if !args.force && (config_path.exists() || key_path.exists()) {
        bail!(
            "{} is already initialized (pass --force to overwrite)",
            data_dir.display()
        );
    }
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let keypair = KestrelKeypair::generate();
    let address = Address::from(keypair.public_key());

    let now = u64::try_from(chrono::Utc::now().timestamp())
        .context("system clock is before the UNIX epoch")?;
    let mut chain = ChainConfig::devnet(address, &args.peer_id, args.allocation);
    chain.genesis.time = now - now % chain.block_interval;
    let node_config = NodeConfig {
        chain,
        mempool: MempoolConfig::default(),
    };
    node_config
        .chain
        .validate()
        .context("generated devnet config is invalid")?;
    node_config
        .save(&config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    write_key_file(&key_path, &keypair)?;

    tracing::info!(
        address = %address,
        key_path = %key_path.display(),
        genesis_time = node_config.chain.genesis.time,
        "node initialized"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Validator key  : {}", key_path.display());
    println!("  Address        : {}", address);
    println!("  Allocation     : {}", args.allocation);

    Ok(())
}

fn write_key_file(path: &Path, keypair: &KestrelKeypair) -> Result<()> {
    std::fs::write(path, keypair.secret_key_hex())
        .with_context(|| format!("failed to write validator key to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", path.display()))?;
    }
    Ok(())
}

/// Queries a running node's status endpoint and prints the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let (authority, base) = split_url(&args.url)?;
    let path = format!("{}/status", base.trim_end_matches('/'));

    let mut stream = tokio::net::TcpStream::connect(&authority)
        .await
        .with_context(|| format!("failed to connect to {}", authority))?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, authority,
    );
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or(&response);
    println!("{}", body);
    Ok(())
}

/// Splits `http://host:port/base` into `("host:port", "/base")`.
fn split_url(url: &str) -> Result<(String, String)> {
    let Some(rest) = url.strip_prefix("http://") else {
        bail!("only plain http:// URLs are supported: {url}");
    };
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        bail!("missing host in URL: {url}");
    }
    let authority = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };
    Ok((authority, path.to_string()))
}

/// Prints version information to stdout.
fn print_version() {
    println!("kestrel-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", PROTOCOL_VERSION);
    println!("data files   {}, {}", CONFIG_FILE, KEY_FILE);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
