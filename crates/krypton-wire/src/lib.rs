//! Krypton wire protocol: request/response correlation between a dapp and a
//! wallet over one bidirectional message stream.
//!
//! ## Architecture
//!
//! - **Envelope**: JSON-RPC 2.0 shaped request/response messages
//! - **PacketIdAllocator**: wrapping call ids, with `1` reserved for the handshake
//! - **PendingCalls**: outstanding calls awaiting a response or their deadline
//! - **SendQueue**: FIFO outbound buffer drained by the writer loop
//! - **DappConnection** / **WalletConnection**: the two roles of the connection
//!   engine, each running a reader loop and a writer loop
//! - **MethodRegistry**: wallet-side handlers plus a fallback for unknown methods
//! - **KrMethod**: typed method table used by the dapp at call sites

pub mod connection;
pub mod dapp;
pub mod envelope;
pub mod error;
pub mod methods;
pub mod packet_id;
pub mod pending;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod wallet;

pub use connection::{CloseReason, ConnectionState, PeerInfo, Role};
pub use dapp::{connect, DappConnection, DappOptions, RequestOptions};
pub use envelope::{decode, encode, Envelope, EnvelopeBody};
pub use error::{CallError, DecodeError, WireError};
pub use methods::{KrConnected, KrIdentities, KrMethod, KrSign, HANDSHAKE_METHOD};
pub use packet_id::{PacketIdAllocator, HANDSHAKE_ID};
pub use registry::{DispatchError, HandlerError, MethodHandler, MethodRegistry, RegistryError};
pub use transport::{channel_pair, ChannelTransport, FramedStream, Transport};
pub use wallet::{serve, WalletConnection, WalletOptions};
