//! Dapp role: initiates the handshake and issues calls to the wallet.

use crate::connection::{
    CloseReason, ConnectionState, Engine, OnClose, PeerInfo, Reply, Role, RoleHooks,
};
use crate::envelope::Envelope;
use crate::error::{CallError, WireError};
use crate::methods::{encode_args, KrMethod, HANDSHAKE_METHOD};
use crate::packet_id::HANDSHAKE_ID;
use crate::registry::MethodRegistry;
use crate::transport::Transport;
use async_trait::async_trait;
use krypton_types::{Capabilities, ConnectionConfig, DappIdentity, WalletIdentity};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

/// Callback run once when the wallet's identity arrives.
pub type OnConnect = Box<dyn FnOnce(&WalletIdentity) + Send>;

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Overrides the configured default timeout.
    pub timeout_ms: Option<u64>,
}

impl RequestOptions {
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
        }
    }

    pub(crate) fn timeout(&self, config: &ConnectionConfig) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.default_timeout())
    }
}

/// Options for [`DappConnection::connect`].
#[derive(Default)]
pub struct DappOptions {
    config: ConnectionConfig,
    on_connect: Option<OnConnect>,
    on_close: Option<OnClose>,
    registry: Option<MethodRegistry>,
}

impl DappOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `callback` once the handshake completes.
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&WalletIdentity) + Send + 'static,
    {
        self.on_connect = Some(Box::new(callback));
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

    /// Serve requests sent by the wallet. Without a registry every inbound
    /// request is answered with `null`.
    pub fn with_registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

pub(crate) struct DappHooks {
    identity: DappIdentity,
    registry: MethodRegistry,
    on_connect: Mutex<Option<OnConnect>>,
    capabilities: OnceLock<Capabilities>,
}

#[async_trait]
impl RoleHooks for DappHooks {
    type Peer = WalletIdentity;

    const ROLE: Role = Role::Dapp;

    fn handshake_response(&self, result: Value) -> Option<WalletIdentity> {
        match serde_json::from_value(result) {
            Ok(wallet) => Some(wallet),
            Err(e) => {
                warn!(error = %e, "Wallet answered the handshake without a valid identity");
                None
            }
        }
    }

    fn connected(&self, wallet: &WalletIdentity) {
        let capabilities = Capabilities::negotiate(&self.identity, wallet);
        if !capabilities.is_satisfied() {
            warn!(
                wallet = %wallet.name,
                missing = ?capabilities.missing_required,
                "Wallet does not serve all required chains"
            );
        }
        info!(
            wallet = %wallet.name,
            chains = capabilities.chains.len(),
            "Connected to wallet"
        );
        let _ = self.capabilities.set(capabilities);

        let callback = self
            .on_connect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(callback) = callback {
            callback(wallet);
        }
    }

    async fn request(&self, method: String, params: Vec<Value>) -> Reply<WalletIdentity> {
        match self.registry.dispatch(&method, params).await {
            Ok(result) => Reply::value(result),
            Err(e) => {
                warn!(error = %e, "Request from wallet failed");
                Reply::value(Value::Null)
            }
        }
    }
}

/// A dapp's connection to one wallet.
pub struct DappConnection {
    engine: Arc<Engine<DappHooks>>,
}

impl DappConnection {
    /// Start a connection over an established stream.
    ///
    /// The handshake request is queued before the loops start, so it is the
    /// first message written. Must be called from within a tokio runtime.
    pub fn connect<T: Transport>(
        identity: DappIdentity,
        transport: T,
        options: DappOptions,
    ) -> Result<Self, WireError> {
        let DappOptions {
            config,
            on_connect,
            on_close,
            registry,
        } = options;

        let handshake = Envelope::request(
            HANDSHAKE_ID,
            HANDSHAKE_METHOD,
            vec![serde_json::to_value(&identity)?],
        );
        info!(dapp = %identity.name, "Starting handshake");

        let hooks = DappHooks {
            identity,
            registry: registry.unwrap_or_default(),
            on_connect: Mutex::new(on_connect),
            capabilities: OnceLock::new(),
        };
        let engine = Engine::new(hooks, config, on_close);
        engine.enqueue(&handshake)?;
        engine.start(transport);
        Ok(Self { engine })
    }

    /// Open a stream with `stream_factory`, then [`connect`](Self::connect).
    pub async fn connect_with<F, Fut, T>(
        identity: DappIdentity,
        stream_factory: F,
        options: DappOptions,
    ) -> Result<Self, WireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WireError>>,
        T: Transport,
    {
        let transport = stream_factory().await?;
        Self::connect(identity, transport, options)
    }

    pub fn identity(&self) -> &DappIdentity {
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

    /// The wallet's identity, once the handshake has completed.
    pub fn peer_identity(&self) -> Option<WalletIdentity> {
        self.engine.peer().map(|peer| peer.identity.clone())
    }

    pub fn peer_info(&self) -> Option<PeerInfo<WalletIdentity>> {
        self.engine.peer().cloned()
    }

    /// Chains and methods both sides agreed on, once connected.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.engine.hooks().capabilities.get()
    }

    /// Wait until the state is at least `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> ConnectionState {
        self.engine.wait_for_state(target).await
    }

    /// Wait for the handshake. Returns the wallet identity, or `None` if the
    /// connection closed first.
    pub async fn connected(&self) -> Option<WalletIdentity> {
        match self.wait_for_state(ConnectionState::Connected).await {
            ConnectionState::Connected => self.peer_identity(),
            _ => None,
        }
    }

    /// Call `method` with positional `params`.
    ///
    /// Fails with [`CallError::NotConnected`] before the handshake completes.
    /// A `null` result is returned as [`Value::Null`].
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        options: RequestOptions,
    ) -> Result<Value, CallError> {
        let timeout = options.timeout(self.engine.config());
        self.engine.call(method, params, timeout).await
    }

    /// Call a typed method. A `null` result becomes [`CallError::EmptyResult`].
    pub async fn request<M: KrMethod>(
        &self,
        args: M::Args,
        options: RequestOptions,
    ) -> Result<M::Return, CallError> {
        let params = encode_args::<M>(&args).map_err(|e| CallError::Encode(e.to_string()))?;
        let result = self.call(M::NAME, params, options).await?;
        if result.is_null() {
            return Err(CallError::EmptyResult {
                method: M::NAME.to_string(),
            });
        }
        serde_json::from_value(result).map_err(|e| CallError::InvalidResult {
            method: M::NAME.to_string(),
            reason: e.to_string(),
        })
    }

    /// Close the connection and wait for both loops to stop. Pending calls
    /// fail with [`CallError::ConnectionClosed`].
    pub async fn close(&self) {
        self.engine.close().await;
    }

    /// Wait until the connection is closed by either side.
    pub async fn closed(&self) {
        self.wait_for_state(ConnectionState::Closed).await;
    }
}

impl Drop for DappConnection {
    fn drop(&mut self) {
        self.engine.shutdown(CloseReason::Local);
    }
}

/// Connect to a wallet over `transport`. See [`DappConnection::connect`].
pub fn connect<T: Transport>(
    identity: DappIdentity,
    transport: T,
    options: DappOptions,
) -> Result<DappConnection, WireError> {
    DappConnection::connect(identity, transport, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode, encode, EnvelopeBody};
    use crate::transport::{channel_pair, MessageReader, MessageWriter};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dapp_identity() -> DappIdentity {
        DappIdentity::new("A").with_chain(1, ["m"])
    }

    fn wallet_identity() -> WalletIdentity {
        WalletIdentity::new("B").with_chain(1, ["m"])
    }

    #[tokio::test]
    async fn test_handshake_is_first_message() {
        let (local, remote) = channel_pair();
        let (mut wallet_rx, _wallet_tx) = remote.split();
        let dapp = DappConnection::connect(dapp_identity(), local, DappOptions::new()).unwrap();
        assert_eq!(dapp.state(), ConnectionState::Handshaking);

        let first = decode(&wallet_rx.read_message().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.id, HANDSHAKE_ID);
        match first.body {
            EnvelopeBody::Request { method, params } => {
                assert_eq!(method, HANDSHAKE_METHOD);
                assert_eq!(params, vec![serde_json::to_value(dapp_identity()).unwrap()]);
            }
            other => panic!("Expected handshake request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_before_handshake_fails_immediately() {
        let (local, _remote) = channel_pair();
        let dapp = DappConnection::connect(dapp_identity(), local, DappOptions::new()).unwrap();

        let err = dapp
            .call("m", vec![], RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, CallError::NotConnected);
    }

    #[tokio::test]
    async fn test_on_connect_runs_once_and_malformed_frames_are_skipped() {
        let (local, remote) = channel_pair();
        let (mut wallet_rx, mut wallet_tx) = remote.split();
        let connects = Arc::new(AtomicUsize::new(0));
        let options = {
            let connects = Arc::clone(&connects);
            DappOptions::new().on_connect(move |wallet| {
                assert_eq!(wallet.name, "B");
                connects.fetch_add(1, Ordering::SeqCst);
            })
        };
        let dapp = DappConnection::connect(dapp_identity(), local, options).unwrap();
        wallet_rx.read_message().await.unwrap().unwrap();

        wallet_tx.write_message(b"{not json").await.unwrap();
        let reply = Envelope::response(HANDSHAKE_ID, serde_json::to_value(wallet_identity()).unwrap());
        wallet_tx.write_message(&encode(&reply).unwrap()).await.unwrap();
        wallet_tx.write_message(&encode(&reply).unwrap()).await.unwrap();

        assert_eq!(dapp.connected().await, Some(wallet_identity()));
        assert!(dapp.capabilities().unwrap().allows(1, "m"));
        assert!(dapp.peer_info().is_some());

        // Let the duplicate reply be processed.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(dapp.is_connected());
    }

    #[tokio::test]
    async fn test_panicking_on_connect_closes_with_error() {
        let (local, remote) = channel_pair();
        let (mut wallet_rx, mut wallet_tx) = remote.split();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let options = {
            let reasons = Arc::clone(&reasons);
            DappOptions::new()
                .on_connect(|_wallet| panic!("callback raised"))
                .on_close(move |reason| reasons.lock().unwrap().push(reason))
        };
        let dapp = DappConnection::connect(dapp_identity(), local, options).unwrap();
        wallet_rx.read_message().await.unwrap().unwrap();

        let reply = Envelope::response(HANDSHAKE_ID, serde_json::to_value(wallet_identity()).unwrap());
        wallet_tx.write_message(&encode(&reply).unwrap()).await.unwrap();

        dapp.closed().await;
        assert_eq!(dapp.state(), ConnectionState::Closed);
        assert_eq!(
            *reasons.lock().unwrap(),
            vec![CloseReason::Error("handler panicked: callback raised".to_string())]
        );
    }

    #[tokio::test]
    async fn test_typed_request_null_result() {
        let (local, remote) = channel_pair();
        let (mut wallet_rx, mut wallet_tx) = remote.split();
        let dapp = DappConnection::connect(dapp_identity(), local, DappOptions::new()).unwrap();
        wallet_rx.read_message().await.unwrap().unwrap();
        let reply = Envelope::response(HANDSHAKE_ID, serde_json::to_value(wallet_identity()).unwrap());
        wallet_tx.write_message(&encode(&reply).unwrap()).await.unwrap();
        dapp.connected().await.unwrap();

        let fake_wallet = tokio::spawn(async move {
            let request = decode(&wallet_rx.read_message().await.unwrap().unwrap()).unwrap();
            assert_eq!(request.method(), Some("kr_sign"));
            let reply = Envelope::response(request.id, json!(null));
            wallet_tx.write_message(&encode(&reply).unwrap()).await.unwrap();
            (wallet_rx, wallet_tx)
        });

        let err = dapp
            .request::<crate::methods::KrSign>(
                ("0xabc".to_string(), "hello".to_string()),
                RequestOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CallError::EmptyResult {
                method: "kr_sign".to_string()
            }
        );
        let _ = fake_wallet.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_end_of_stream_closes() {
        let (local, remote) = channel_pair();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let options = {
            let reasons = Arc::clone(&reasons);
            DappOptions::new().on_close(move |reason| reasons.lock().unwrap().push(reason))
        };
        let dapp = DappConnection::connect(dapp_identity(), local, options).unwrap();
        let (_wallet_rx, wallet_tx) = remote.split();
        drop(wallet_tx);

        dapp.closed().await;
        assert_eq!(dapp.state(), ConnectionState::Closed);
        assert_eq!(*reasons.lock().unwrap(), vec![CloseReason::EndOfStream]);
        assert_eq!(
            dapp.call("m", vec![], RequestOptions::default()).await,
            Err(CallError::ConnectionClosed)
        );
    }
}
