//! # CLI Interface
//!
//! Defines the command-line argument structure for `mech-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use mech_protocol::config::{DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};

/// Mech marketplace devnet node.
///
/// Hosts a single marketplace deployment, accepts signed calls over
/// JSON-RPC, streams marketplace events over WebSocket, and exposes
/// Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "mech-node",
    about = "Mech marketplace devnet node",
    version,
    propagate_version = true
)]
pub struct MechNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the mech node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory: owner key plus a devnet config.
    Init(InitArgs),
    /// Query the status of a running node via its RPC endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Log output format accepted by `--log-format`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (JSON).
    ///
    /// When omitted, the node reads `config.json` from the data directory.
    #[arg(long, short = 'c', env = "MECH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node data directory holding the database, config and owner key.
    #[arg(long, short = 'd', env = "MECH_DATA_DIR", default_value = ".mech")]
    pub data_dir: PathBuf,

    /// Port for the JSON-RPC, REST and WebSocket API.
    #[arg(long, env = "MECH_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "MECH_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "MECH_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "MECH_DATA_DIR", default_value = ".mech")]
    pub data_dir: PathBuf,

    /// Network to configure for: mainnet, testnet, or devnet.
    #[arg(long, default_value = "devnet")]
    pub network: String,

    /// Overwrite an existing config and key.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// RPC endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9841")]
    pub rpc_url: String,
}
