//! Wallet role: answers the handshake and serves the dapp's calls.
//!
//! Requests are dispatched strictly in arrival order; the reader does not
//! read the next frame until the current handler has finished.

use crate::connection::{
    CloseReason, ConnectionState, Engine, OnClose, PeerInfo, Reply, Role, RoleHooks,
};
use crate::dapp::RequestOptions;
use crate::error::CallError;
use crate::methods::HANDSHAKE_METHOD;
use crate::registry::MethodRegistry;
use crate::transport::Transport;
use async_trait::async_trait;
use krypton_types::{ConnectionConfig, DappIdentity, WalletIdentity};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Options for [`WalletConnection::serve`].
#[derive(Default)]
pub struct WalletOptions {
    config: ConnectionConfig,
    on_close: Option<OnClose>,
}

impl WalletOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `callback` once the connection closes.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(CloseReason) + Send + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }
}

pub(crate) struct WalletHooks {
    identity: WalletIdentity,
    registry: MethodRegistry,
    /// The identity sent in reply to the first handshake, replayed to any
    /// repeated `kr_connected`.
    sent_identity: OnceLock<Value>,
}

impl WalletHooks {
    fn handshake(&self, params: Vec<Value>) -> Reply<DappIdentity> {
        if let Some(sent) = self.sent_identity.get() {
            warn!("Repeated handshake from dapp, replaying wallet identity");
            return Reply::value(sent.clone());
        }

        let (dapp, wallet) = match self.registry.handshake(params, &self.identity) {
            Ok(identities) => identities,
            Err(e) => {
                warn!(error = %e, "Handshake rejected");
                return Reply::value(Value::Null);
            }
        };
        match serde_json::to_value(&wallet) {
            Ok(result) => {
                let _ = self.sent_identity.set(result.clone());
                Reply {
                    result,
                    connected: Some(dapp),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to encode wallet identity");
                Reply::value(Value::Null)
            }
        }
    }
}

#[async_trait]
impl RoleHooks for WalletHooks {
    type Peer = DappIdentity;

    const ROLE: Role = Role::Wallet;

    fn handshake_response(&self, _result: Value) -> Option<DappIdentity> {
        debug!("Ignoring handshake response received by wallet");
        None
    }

    fn connected(&self, dapp: &DappIdentity) {
        info!(
            dapp = %dapp.name,
            uri = dapp.uri.as_deref().unwrap_or(""),
            chains = dapp.requested_chains.len(),
            "Dapp connected"
        );
    }

    async fn request(&self, method: String, params: Vec<Value>) -> Reply<DappIdentity> {
        if method == HANDSHAKE_METHOD {
            return self.handshake(params);
        }
        match self.registry.dispatch(&method, params).await {
            Ok(result) => Reply::value(result),
            Err(e) => {
                warn!(error = %e, "Handler failed, replying with null");
                Reply::value(Value::Null)
            }
        }
    }
}

/// A wallet's connection to one dapp.
pub struct WalletConnection {
    engine: Arc<Engine<WalletHooks>>,
}

impl WalletConnection {
    /// Serve `registry` over an established stream. The wallet waits for the
    /// dapp's `kr_connected` request. Must be called from within a tokio
    /// runtime.
    pub fn serve<T: Transport>(
        identity: WalletIdentity,
        transport: T,
        registry: MethodRegistry,
        options: WalletOptions,
    ) -> Self {
        let WalletOptions { config, on_close } = options;
        info!(wallet = %identity.name, "Serving dapp connection");

        let hooks = WalletHooks {
            identity,
            registry,
            sent_identity: OnceLock::new(),
        };
        let engine = Engine::new(hooks, config, on_close);
        engine.start(transport);
        Self { engine }
    }

    pub fn identity(&self) -> &WalletIdentity {
        &self.engine.hooks().identity
    }

    /// Settings this connection was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        self.engine.config()
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The dapp's identity, once the handshake has completed.
    pub fn peer_identity(&self) -> Option<DappIdentity> {
        self.engine.peer().map(|peer| peer.identity.clone())
    }

    pub fn peer_info(&self) -> Option<PeerInfo<DappIdentity>> {
        self.engine.peer().cloned()
    }

    /// Wait until the state is at least `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> ConnectionState {
        self.engine.wait_for_state(target).await
    }

    /// Wait for the handshake. Returns the dapp identity, or `None` if the
    /// connection closed first.
    pub async fn connected(&self) -> Option<DappIdentity> {
        match self.wait_for_state(ConnectionState::Connected).await {
            ConnectionState::Connected => self.peer_identity(),
            _ => None,
        }
    }

    /// Call a method on the dapp. Available as soon as the stream is open.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        options: RequestOptions,
    ) -> Result<Value, CallError> {
        let timeout = options.timeout(self.engine.config());
        self.engine.call(method, params, timeout).await
    }

    /// Close the connection and wait for both loops to stop.
    pub async fn close(&self) {
        self.engine.close().await;
    }

    /// Wait until the connection is closed by either side.
    pub async fn closed(&self) {
        self.wait_for_state(ConnectionState::Closed).await;
    }
}

impl Drop for WalletConnection {
    fn drop(&mut self) {
        self.engine.shutdown(CloseReason::Local);
    }
}

/// Serve a dapp over `transport` with default options.
pub fn serve<T: Transport>(
    identity: WalletIdentity,
    transport: T,
    registry: MethodRegistry,
) -> WalletConnection {
    WalletConnection::serve(identity, transport, registry, WalletOptions::default())
}
