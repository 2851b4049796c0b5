//! Clap CLI definitions for the `krypton` binary.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  krypton wallet --listen 127.0.0.1:7400
  krypton call --connect 127.0.0.1:7400 kr_identities '[true]'
  krypton call --connect 127.0.0.1:7400 kr_sign '[\"0x01\", \"hello\"]'";

/// Krypton dapp/wallet protocol over TCP.
#[derive(Parser)]
#[command(name = "krypton", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to a connection config file (TOML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a demo wallet serving kr_identities and kr_sign.
    Wallet {
        /// Address to accept dapp connections on.
        #[arg(long, default_value = "127.0.0.1:7400")]
        listen: SocketAddr,
        /// Wallet name sent in the handshake.
        #[arg(long, default_value = "krypton-demo-wallet")]
        name: String,
        /// Chain id to serve (repeatable).
        #[arg(long = "chain", default_values_t = [1u64])]
        chains: Vec<u64>,
        /// Account reported by kr_identities and accepted by kr_sign.
        #[arg(long, default_value = "0x0000000000000000000000000000000000000001")]
        account: String,
    },
    /// Connect as a dapp, issue one call and print the result.
    Call {
        /// Wallet address to connect to.
        #[arg(long)]
        connect: SocketAddr,
        /// Method name, e.g. kr_sign.
        method: String,
        /// Positional params as a JSON array. A non-array value is sent as
        /// the only param.
        #[arg(default_value = "[]")]
        params: String,
        /// Dapp name sent in the handshake.
        #[arg(long, default_value = "krypton-cli")]
        name: String,
        /// Chain id to request (repeatable).
        #[arg(long = "chain", default_values_t = [1u64])]
        chains: Vec<u64>,
        /// Call timeout in milliseconds; defaults to the config value.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}
