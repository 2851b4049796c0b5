//! Connection engine shared by the dapp and wallet roles.
//!
//! Each connection owns one stream and runs two tasks:
//!
//! - the **reader loop** reads one message at a time, decodes it, and either
//!   resolves a pending call or dispatches a request and enqueues the reply;
//! - the **writer loop** drains the [`SendQueue`] onto the stream.
//!
//! The loops share only the send queue and the pending-call table. Role
//! specific behaviour (handshake handling, request dispatch) lives behind
//! [`RoleHooks`].

use crate::envelope::{decode, encode, Envelope, EnvelopeBody};
use crate::error::{CallError, WireError};
use crate::packet_id::{PacketIdAllocator, HANDSHAKE_ID};
use crate::pending::{CallResult, PendingCalls};
use crate::queue::{Dequeued, SendQueue};
use crate::registry::panic_message;
use crate::transport::{check_size, MessageReader, MessageWriter, Transport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use krypton_types::ConnectionConfig;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Created, loops not started.
    Idle,
    /// Stream open, identities not yet exchanged.
    Handshaking,
    /// Handshake complete.
    Connected,
    /// Stream ended or closed locally. Terminal.
    Closed,
}

/// Which side of the protocol a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake and issues calls.
    Dapp,
    /// Answers the handshake and serves calls.
    Wallet,
}

/// Why a connection reached [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or the handle was dropped.
    Local,
    /// The peer ended the stream.
    EndOfStream,
    /// Reading or writing failed.
    Error(String),
}

/// The peer's identity as received during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo<I> {
    pub identity: I,
    pub connected_at: DateTime<Utc>,
}

/// Callback run once when the connection closes.
pub type OnClose = Box<dyn FnOnce(CloseReason) + Send>;

/// Result of handling one inbound request.
pub(crate) struct Reply<P> {
    /// Value sent back as `result`.
    pub result: Value,
    /// Set when this request completed the handshake.
    pub connected: Option<P>,
}

impl<P> Reply<P> {
    pub fn value(result: Value) -> Self {
        Self {
            result,
            connected: None,
        }
    }
}

/// Role specific parts of the engine.
#[async_trait]
pub(crate) trait RoleHooks: Send + Sync + Sized + 'static {
    /// Identity type of the remote party.
    type Peer: Clone + Send + Sync + 'static;

    const ROLE: Role;

    /// A response with the handshake id arrived. Returns the peer identity if
    /// the response completes the handshake.
    fn handshake_response(&self, result: Value) -> Option<Self::Peer>;

    /// Called once, right after the state moves to `Connected`.
    fn connected(&self, peer: &Self::Peer);

    /// Handle an inbound request.
    async fn request(&self, method: String, params: Vec<Value>) -> Reply<Self::Peer>;
}

pub(crate) struct Engine<R: RoleHooks> {
    hooks: R,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    queue: SendQueue,
    pending: Arc<PendingCalls>,
    ids: PacketIdAllocator,
    peer: OnceLock<PeerInfo<R::Peer>>,
    on_close: Mutex<Option<OnClose>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: RoleHooks> Engine<R> {
    pub fn new(hooks: R, config: ConnectionConfig, on_close: Option<OnClose>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Arc::new(Self {
            hooks,
            config,
            state,
            queue: SendQueue::new(),
            pending: PendingCalls::new(),
            ids: PacketIdAllocator::new(),
            peer: OnceLock::new(),
            on_close: Mutex::new(on_close),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn hooks(&self) -> &R {
        &self.hooks
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Queue a message ahead of the loops starting.
    pub fn enqueue(&self, envelope: &Envelope) -> Result<(), WireError> {
        self.queue.enqueue(self.encode_bounded(envelope)?)
    }

    /// Encode `envelope`, rejecting bodies over the configured size limit.
    fn encode_bounded(&self, envelope: &Envelope) -> Result<Vec<u8>, WireError> {
        let bytes = encode(envelope)?;
        check_size(bytes.len(), self.config.max_message_size)?;
        Ok(bytes)
    }

    /// Split the transport and spawn the reader and writer loops.
    pub fn start<T: Transport>(self: &Arc<Self>, transport: T) {
        let (reader, writer) = transport.split();
        self.advance(ConnectionState::Handshaking);
        info!(
            role = ?R::ROLE,
            protocol = %self.config.protocol_id,
            timeout_ms = self.config.default_timeout_ms,
            "Connection started"
        );

        let reader_task = tokio::spawn(reader_loop(Arc::clone(self), reader));
        let writer_task = tokio::spawn(writer_loop(Arc::clone(self), writer));
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([reader_task, writer_task]);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn peer(&self) -> Option<&PeerInfo<R::Peer>> {
        self.peer.get()
    }

    /// Wait until the state is at least `target`; returns the state reached.
    pub async fn wait_for_state(&self, target: ConnectionState) -> ConnectionState {
        let mut rx = self.state.subscribe();
        let reached = match rx.wait_for(|state| *state >= target).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        };
        reached
    }

    /// Move the state forward. Returns false if `next` is not ahead of the
    /// current state.
    fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if next > *state {
                debug!(role = ?R::ROLE, from = ?*state, to = ?next, "Connection state change");
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Issue a request and wait for its response.
    pub async fn call(&self, method: &str, params: Vec<Value>, timeout: Duration) -> CallResult {
        match self.state() {
            ConnectionState::Closed => return Err(CallError::ConnectionClosed),
            ConnectionState::Connected => {}
            _ if R::ROLE == Role::Dapp => return Err(CallError::NotConnected),
            _ => {}
        }

        let id = self.ids.next();
        let bytes = match self.encode_bounded(&Envelope::request(id, method, params)) {
            Ok(bytes) => bytes,
            Err(WireError::MessageTooLarge { size, max }) => {
                return Err(CallError::MessageTooLarge { size, max })
            }
            Err(e) => return Err(CallError::Encode(e.to_string())),
        };

        // Register before enqueueing so a fast response cannot be missed.
        let reply = self.pending.register(id, timeout);
        if self.queue.enqueue(bytes).is_err() {
            self.pending.cancel(id);
            return Err(CallError::ConnectionClosed);
        }
        debug!(role = ?R::ROLE, id, method, "Request queued");

        reply.wait().await
    }

    /// Close the connection: stop both loops, fail pending calls, and run the
    /// close callback. Idempotent.
    pub fn shutdown(&self, reason: CloseReason) {
        let first = self.advance(ConnectionState::Closed);
        self.queue.close();
        let failed = self.pending.fail_all();

        if first {
            info!(role = ?R::ROLE, ?reason, failed_calls = failed, "Connection closed");
            let callback = self
                .on_close
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(callback) = callback {
                callback(reason);
            }
        }
    }

    /// Shut down and wait for both loops to finish.
    pub async fn close(&self) {
        self.shutdown(CloseReason::Local);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(role = ?R::ROLE, error = %e, "Connection task failed");
            }
        }
    }

    fn mark_connected(&self, identity: R::Peer) {
        let info = PeerInfo {
            identity,
            connected_at: Utc::now(),
        };
        if self.peer.set(info).is_err() {
            warn!(role = ?R::ROLE, "Ignoring repeated handshake");
            return;
        }
        if self.advance(ConnectionState::Connected) {
            if let Some(peer) = self.peer.get() {
                self.hooks.connected(&peer.identity);
            }
        }
    }

    /// Process one inbound frame. Malformed frames are logged and skipped.
    async fn handle_frame(&self, bytes: &[u8]) {
        let envelope = match decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    role = ?R::ROLE,
                    error = %e,
                    frame = %String::from_utf8_lossy(bytes),
                    "Dropping malformed frame"
                );
                return;
            }
        };

        let id = envelope.id;
        match envelope.body {
            EnvelopeBody::Response { result } if id == HANDSHAKE_ID => {
                if let Some(peer) = self.hooks.handshake_response(result) {
                    self.mark_connected(peer);
                }
            }
            EnvelopeBody::Response { result } => {
                self.pending.resolve(id, result);
            }
            EnvelopeBody::Request { method, params } => {
                debug!(role = ?R::ROLE, id, method = %method, "Dispatching request");
                let reply = self.hooks.request(method, params).await;
                let sent = match self.enqueue(&Envelope::response(id, reply.result)) {
                    Err(WireError::MessageTooLarge { size, max }) => {
                        warn!(role = ?R::ROLE, id, size, max, "Reply too large, sending null");
                        self.enqueue(&Envelope::response(id, Value::Null))
                    }
                    sent => sent,
                };
                if let Err(e) = sent {
                    debug!(role = ?R::ROLE, id, error = %e, "Reply not sent");
                }
                if let Some(peer) = reply.connected {
                    self.mark_connected(peer);
                }
            }
        }
    }
}

async fn reader_loop<R, M>(engine: Arc<Engine<R>>, mut reader: M)
where
    R: RoleHooks,
    M: MessageReader,
{
    let mut state = engine.state.subscribe();
    let reason = loop {
        let frame = tokio::select! {
            frame = reader.read_message() => frame,
            _ = closed(&mut state) => break CloseReason::Local,
        };
        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break CloseReason::EndOfStream,
            Err(e) => break CloseReason::Error(e.to_string()),
        };

        // A handler may wait indefinitely (user approval); closing must not.
        let handled = tokio::select! {
            handled = AssertUnwindSafe(engine.handle_frame(&bytes)).catch_unwind() => handled,
            _ = closed(&mut state) => break CloseReason::Local,
        };
        if let Err(payload) = handled {
            let reason = panic_message(payload.as_ref());
            warn!(role = ?R::ROLE, %reason, "Frame handling panicked");
            break CloseReason::Error(reason);
        }
    };
    debug!(role = ?R::ROLE, ?reason, "Reader loop finished");
    engine.shutdown(reason);
}

async fn closed(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|state| *state == ConnectionState::Closed)
        .await;
}

async fn writer_loop<R, W>(engine: Arc<Engine<R>>, mut writer: W)
where
    R: RoleHooks,
    W: MessageWriter,
{
    let mut state = engine.state.subscribe();
    while let Dequeued::Message(bytes) = engine.queue.dequeue_blocking().await {
        let written = tokio::select! {
            written = writer.write_message(&bytes) => written,
            _ = closed(&mut state) => break,
        };
        if let Err(e) = written {
            engine.shutdown(CloseReason::Error(e.to_string()));
            break;
        }
    }
    if let Err(e) = writer.close().await {
        debug!(role = ?R::ROLE, error = %e, "Closing stream failed");
    }
    debug!(role = ?R::ROLE, "Writer loop finished");
}
