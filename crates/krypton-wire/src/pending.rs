//! Pending-call table.
//!
//! One entry per outstanding request, removed exactly once by whichever of
//! response arrival, deadline expiry, or connection close happens first.
//! Waiters are woken through a oneshot channel; no polling.

use crate::error::CallError;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome delivered to the caller of a pending call.
pub type CallResult = Result<Value, CallError>;

struct PendingCall {
    created_at: Instant,
    timeout: Duration,
    waiter: oneshot::Sender<CallResult>,
}

/// Outstanding calls of one connection, keyed by packet id.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<u16, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a waiter for `id`. The returned reply resolves with the
    /// response, or with [`CallError::Timeout`] once `timeout` has elapsed.
    pub fn register(self: &Arc<Self>, id: u16, timeout: Duration) -> PendingReply {
        let (waiter, rx) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let call = PendingCall {
            created_at,
            timeout,
            waiter,
        };
        if let Some(stale) = self.calls.insert(id, call) {
            warn!(id, "Packet id reused while a call was still pending");
            let _ = stale.waiter.send(Err(CallError::ConnectionClosed));
        }
        PendingReply {
            id,
            deadline,
            rx,
            table: Arc::clone(self),
        }
    }

    /// Complete the waiter for `id`. Returns false when nothing was waiting,
    /// in which case the result is dropped.
    pub fn resolve(&self, id: u16, result: Value) -> bool {
        match self.calls.remove(&id) {
            Some((_, call)) => {
                let _ = call.waiter.send(Ok(result));
                true
            }
            None => {
                debug!(id, "Dropping response for a call that is no longer pending");
                false
            }
        }
    }

    /// Fail the waiter for `id` with a timeout if it is still unresolved.
    pub fn expire(&self, id: u16) -> bool {
        match self.calls.remove(&id) {
            Some((_, call)) => {
                let timeout_ms = u64::try_from(call.timeout.as_millis()).unwrap_or(u64::MAX);
                debug!(
                    id,
                    timeout_ms,
                    waited_ms = call.created_at.elapsed().as_millis() as u64,
                    "Pending call timed out"
                );
                let _ = call.waiter.send(Err(CallError::Timeout { id, timeout_ms }));
                true
            }
            None => false,
        }
    }

    /// Forget `id` without notifying its waiter.
    pub(crate) fn cancel(&self, id: u16) {
        self.calls.remove(&id);
    }

    /// Fail every pending call with [`CallError::ConnectionClosed`].
    pub fn fail_all(&self) -> usize {
        let ids: Vec<u16> = self.calls.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                let _ = call.waiter.send(Err(CallError::ConnectionClosed));
                failed += 1;
            }
        }
        failed
    }

    pub fn contains(&self, id: u16) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// The caller's side of a pending call.
pub struct PendingReply {
    id: u16,
    deadline: Instant,
    rx: oneshot::Receiver<CallResult>,
    table: Arc<PendingCalls>,
}

impl PendingReply {
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Wait for the response or the deadline.
    pub async fn wait(mut self) -> CallResult {
        tokio::select! {
            result = &mut self.rx => result.unwrap_or(Err(CallError::ConnectionClosed)),
            _ = tokio::time::sleep_until(self.deadline) => {
                // If a response won the race, `expire` finds nothing and the
                // value is already in the channel.
                self.table.expire(self.id);
                self.rx.await.unwrap_or(Err(CallError::ConnectionClosed))
            }
        }
    }
}
