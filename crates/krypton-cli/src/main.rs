//! Krypton CLI: a demo wallet and a one-shot dapp caller over TCP.

mod cli;
mod cmd;

use crate::cli::{Cli, Commands};
use clap::Parser;
use krypton_types::load_config;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = load_config(cli.config.as_deref());
    let outcome = match cli.command {
        Commands::Wallet {
            listen,
            name,
            chains,
            account,
        } => cmd::cmd_wallet(
            config,
            cmd::WalletArgs {
                listen,
                name,
                chains,
                account,
            },
        ),
        Commands::Call {
            connect,
            method,
            params,
            name,
            chains,
            timeout_ms,
        } => cmd::cmd_call(
            config,
            cmd::CallArgs {
                connect,
                method,
                params,
                name,
                chains,
                timeout_ms,
            },
        ),
    };

    if let Err(e) = outcome {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
