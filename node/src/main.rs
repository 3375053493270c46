// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Mech Marketplace Node
//!
//! Entry point for the `mech-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the marketplace from its sled
//! database, and serves the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     start the node
//! - `init`    create a data directory, owner key and devnet config
//! - `status`  query a running node's status endpoint
//! - `version` print build version information

mod api;
mod cli;
mod config;
mod envelope;
mod logging;
mod metrics;
mod node;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use mech_protocol::crypto::MechKeypair;
use mech_protocol::identity::Address;
use mech_protocol::storage::MarketDb;

use cli::{Commands, MechNodeCli};
use config::{NodeConfig, CONFIG_FILE, OWNER_KEY_FILE};
use logging::LogFormat;
use metrics::NodeMetrics;
use node::MarketNode;

/// Broadcast channel capacity for live event streaming. Large enough to
/// absorb a full batch without dropping events for WebSocket clients.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MechNodeCli::parse();

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

/// Starts the node: API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, LogFormat::from(args.log_format));

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join(CONFIG_FILE));
    let config = NodeConfig::load(&config_path)
        .with_context(|| format!("run `mech-node init -d {}` first", args.data_dir.display()))?;

    let key_path = args.data_dir.join(OWNER_KEY_FILE);
    match config::load_owner_key(&key_path)? {
        Some(keypair) => {
            let holder = Address::from_public_key(&keypair.public_key());
            if holder == config.genesis.owner {
                tracing::info!(owner = %holder, "owner key loaded");
            } else {
                tracing::warn!(
                    key = %holder,
                    owner = %config.genesis.owner,
                    "owner key does not match the genesis owner"
                );
            }
        }
        None => tracing::info!("no owner key in data directory"),
    }

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        network = %config.network,
        chain_id = config.genesis.chain_id,
        "starting mech-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = MarketDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Marketplace ---
    let market = Arc::new(MarketNode::open(
        &config,
        db.clone(),
        Arc::clone(&node_metrics),
        event_tx,
    )?);

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            mech_protocol::config::PROTOCOL_VERSION,
        ),
        node: Arc::clone(&market),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("mech-node stopped");
    Ok(())
}

/// Creates the data directory, the owner keypair and a devnet config owned
/// by that key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("mech_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), network = %args.network, "initializing node");

    let config_path = data_dir.join(CONFIG_FILE);
    let key_path = data_dir.join(OWNER_KEY_FILE);
    if !args.force && (config_path.exists() || key_path.exists()) {
        anyhow::bail!(
            "{} is already initialized (pass --force to overwrite)",
            data_dir.display()
        );
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let keypair = MechKeypair::generate();
    let owner = Address::from_public_key(&keypair.public_key());

    config::save_owner_key(&key_path, &keypair)?;

    let config = NodeConfig::devnet(&args.network, owner)?;
    config.save(&config_path)?;

    tracing::info!(
        owner = %owner,
        key_path = %key_path.display(),
        "owner keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Network        : {}", args.network);
    println!("  Chain id       : {:#x}", config.genesis.chain_id);
    println!("  Config         : {}", config_path.display());
    println!("  Owner key      : {}", key_path.display());
    println!("  Owner address  : {}", owner);

    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Minimal HTTP/1.1 GET over a raw TCP stream.
async fn http_get(url: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let parsed: url::Url = url
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let addr = format!("{}:{}", parsed.host, parsed.port.unwrap_or(80));
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        parsed.path, parsed.host,
    );
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Prints version information to stdout.
fn print_version() {
    println!("mech-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", mech_protocol::config::PROTOCOL_VERSION);
    println!(
        "rustc     {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to install Ctrl+C handler")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;

    Ok(())
}

/// Just enough URL parsing for `status`: host, port and path.
mod url {
    pub struct Url {
        pub host: String,
        pub port: Option<u16>,
        pub path: String,
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let rest = s
                .strip_prefix("http://")
                .or_else(|| s.strip_prefix("https://"))
                .unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };
            if authority.is_empty() {
                return Err("missing host".to_string());
            }

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..]
                        .parse::<u16>()
                        .map_err(|e| format!("bad port: {}", e))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url {
                host,
                port,
                path: path.to_string(),
            })
        }
    }

}
