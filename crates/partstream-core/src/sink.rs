//! Response sinks: where the engine delivers each fetched part

use crate::error::RetrievalError;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Payload of one part, as handed to the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseChunk {
    pub bytes: Bytes,
}

impl ResponseChunk {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Errors raised while sending a chunk to the peer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The receiving side is gone
    #[error("peer disconnected")]
    Closed,

    /// Transport-specific failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// "Send one message to the calling peer".
///
/// Messages must be delivered in the order `send` is called, without
/// coalescing. `send` may wait for the peer (backpressure).
#[async_trait]
pub trait ResponseSink: Send {
    async fn send(&mut self, chunk: ResponseChunk) -> Result<(), SinkError>;
}

/// Item carried by a [`ChannelSink`]: a part, or the terminal error of the call
pub type SinkItem = Result<Bytes, RetrievalError>;

/// Sink backed by a bounded channel; the receiver feeds a response body
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkItem>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Report the terminal result of the call to the receiver.
    ///
    /// A successful result is signalled by dropping the sender, so the
    /// receiver sees a clean end of stream.
    pub async fn finish(self, result: crate::Result<()>) {
        if let Err(err) = result {
            // Receiver gone means nobody is left to tell
            let _ = self.tx.send(Err(err)).await;
        }
    }

    /// Whether the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn send(&mut self, chunk: ResponseChunk) -> Result<(), SinkError> {
        self.tx
            .send(Ok(chunk.bytes))
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Sink collecting chunks in memory
#[derive(Debug, Default)]
pub struct VecSink {
    pub chunks: Vec<ResponseChunk>,
    fail_after: Option<usize>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` chunks, then fail every send as if the peer disconnected
    pub fn failing_after(n: usize) -> Self {
        Self {
            chunks: Vec::new(),
            fail_after: Some(n),
        }
    }

    /// Chunk lengths, in receipt order
    pub fn lengths(&self) -> Vec<usize> {
        self.chunks.iter().map(ResponseChunk::len).collect()
    }

    /// All chunk payloads concatenated in receipt order
    pub fn concat(&self) -> Vec<u8> {
        self.chunks.iter().flat_map(|c| c.bytes.iter().copied()).collect()
    }
}

#[async_trait]
impl ResponseSink for VecSink {
    async fn send(&mut self, chunk: ResponseChunk) -> Result<(), SinkError> {
        if self.fail_after.is_some_and(|n| self.chunks.len() >= n) {
            return Err(SinkError::Closed);
        }
        self.chunks.push(chunk);
        Ok(())
    }
}
