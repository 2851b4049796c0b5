//! Core types shared by both sides of a Krypton connection.
//!
//! A dapp and a wallet describe themselves with an identity, exchange those
//! identities once during the handshake, and derive the set of chains and
//! methods they can use together.

pub mod capability;
pub mod config;
pub mod identity;

pub use capability::Capabilities;
pub use config::{load_config, try_load_config, ConfigError, ConnectionConfig};
pub use identity::{ChainId, ChainMethods, DappIdentity, MethodName, WalletIdentity};

/// Stream protocol identifier negotiated by the session layer.
pub const PROTOCOL_ID: &str = "/krypton/1.0.0";
