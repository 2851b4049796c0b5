//! Error types for the wire protocol layers.

use thiserror::Error;

/// Errors from the stream layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u64, max: u64 },
}

/// An inbound frame that could not be turned into an [`Envelope`](crate::Envelope).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Failure of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No response arrived before the deadline.
    #[error("Timed out after {timeout_ms} ms waiting for response to packet {id}")]
    Timeout { id: u16, timeout_ms: u64 },
    /// The handshake has not completed yet.
    #[error("Not connected: handshake has not completed")]
    NotConnected,
    /// The stream ended or the connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,
    /// Arguments could not be encoded.
    #[error("Failed to encode request: {0}")]
    Encode(String),
    /// The encoded request exceeds the configured message size limit.
    #[error("Request too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u64, max: u64 },
    /// A typed request received a `null` result.
    #[error("Peer returned no result for {method}")]
    EmptyResult { method: String },
    /// A typed request received a result of the wrong shape.
    #[error("Invalid result for {method}: {reason}")]
    InvalidResult { method: String, reason: String },
}
