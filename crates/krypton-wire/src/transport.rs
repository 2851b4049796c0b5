//! Stream abstraction consumed by the connection engine.
//!
//! The session layer (addressing, relays, encryption, multiplexing) is out of
//! scope; the engine only needs a stream it can split into a message reader
//! and a message writer. Two implementations are provided:
//!
//! - [`FramedStream`]: any byte-oriented `AsyncRead + AsyncWrite` (TCP,
//!   `tokio::io::duplex`), framed as a 4-byte big-endian length followed by
//!   the JSON body.
//! - [`ChannelTransport`]: an in-process, message-oriented pair.

use crate::error::WireError;
use async_trait::async_trait;
use krypton_types::config::DEFAULT_MAX_MESSAGE_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

/// Receiving half of a stream.
#[async_trait]
pub trait MessageReader: Send + 'static {
    /// Read one complete message. `Ok(None)` signals end of stream.
    async fn read_message(&mut self) -> Result<Option<Vec<u8>>, WireError>;
}

/// Sending half of a stream.
#[async_trait]
pub trait MessageWriter: Send + 'static {
    /// Write one complete message.
    async fn write_message(&mut self, message: &[u8]) -> Result<(), WireError>;

    /// Close the sending direction.
    async fn close(&mut self) -> Result<(), WireError>;
}

/// An established, bidirectional stream to the peer.
pub trait Transport: Send + 'static {
    type Reader: MessageReader;
    type Writer: MessageWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Reject a body of `size` bytes if it exceeds `max`.
pub fn check_size(size: usize, max: u32) -> Result<(), WireError> {
    match u32::try_from(size) {
        Ok(size) if size <= max => Ok(()),
        _ => Err(too_large(size, max)),
    }
}

fn too_large(size: usize, max: u32) -> WireError {
    WireError::MessageTooLarge {
        size: u64::try_from(size).unwrap_or(u64::MAX),
        max: u64::from(max),
    }
}

/// Prefix `body` with its 4-byte big-endian length. Bodies that do not fit
/// the header are rejected.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = u32::try_from(body.len()).map_err(|_| too_large(body.len(), u32::MAX))?;
    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(body);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Length-prefixed framing over a byte stream.
pub struct FramedStream<T> {
    io: T,
    max_message_size: u32,
}

impl<T> FramedStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(io: T) -> Self {
        Self {
            io,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Reject frames larger than `max` bytes in either direction.
    pub fn with_max_message_size(mut self, max: u32) -> Self {
        self.max_message_size = max;
        self
    }
}

impl<T> Transport for FramedStream<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    type Reader = FramedReader<ReadHalf<T>>;
    type Writer = FramedWriter<WriteHalf<T>>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = tokio::io::split(self.io);
        (
            FramedReader {
                inner: reader,
                max_message_size: self.max_message_size,
            },
            FramedWriter {
                inner: writer,
                max_message_size: self.max_message_size,
            },
        )
    }
}

/// Reading half of a [`FramedStream`].
pub struct FramedReader<R> {
    inner: R,
    max_message_size: u32,
}

#[async_trait]
impl<R> MessageReader for FramedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let mut header = [0u8; 4];
        match self.inner.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(WireError::Io(e)),
        }

        let len = decode_length(&header);
        check_size(len as usize, self.max_message_size)?;

        let mut body = vec![0u8; len as usize];
        self.inner.read_exact(&mut body).await?;
        Ok(Some(body))
    }
}

/// Writing half of a [`FramedStream`].
pub struct FramedWriter<W> {
    inner: W,
    max_message_size: u32,
}

#[async_trait]
impl<W> MessageWriter for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, message: &[u8]) -> Result<(), WireError> {
        check_size(message.len(), self.max_message_size)?;
        self.inner.write_all(&encode_frame(message)?).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// One end of an in-process message channel.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Two connected in-process transports. Each message is delivered as one unit.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport { tx: a_tx, rx: a_rx },
        ChannelTransport { tx: b_tx, rx: b_rx },
    )
}

impl Transport for ChannelTransport {
    type Reader = ChannelReader;
    type Writer = ChannelWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            ChannelReader { rx: self.rx },
            ChannelWriter { tx: Some(self.tx) },
        )
    }
}

/// Reading half of a [`ChannelTransport`].
pub struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl MessageReader for ChannelReader {
    async fn read_message(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        Ok(self.rx.recv().await)
    }
}

/// Writing half of a [`ChannelTransport`].
pub struct ChannelWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl MessageWriter for ChannelWriter {
    async fn write_message(&mut self, message: &[u8]) -> Result<(), WireError> {
        let tx = self.tx.as_ref().ok_or(WireError::ConnectionClosed)?;
        tx.send(message.to_vec())
            .map_err(|_| WireError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), WireError> {
        self.tx = None;
        Ok(())
    }
}
