//! Decoding of a framed part stream

use crate::{ClientError, Result};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use partstream_core::frame_codec;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

/// Parts of a downloaded object, in order.
///
/// A stream that ends with an error was truncated; the parts received
/// before it are not the whole object and should be discarded.
pub struct ChunkStream {
    inner: BoxStream<'static, Result<Bytes>>,
}

impl ChunkStream {
    /// Decode frames from a raw body stream
    pub fn from_body<S, E>(body: S, max_frame_len: usize) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let reader = StreamReader::new(body.map_err(io::Error::other));
        let inner = FramedRead::new(reader, frame_codec(max_frame_len))
            .map_ok(|frame| frame.freeze())
            .map_err(ClientError::from)
            .boxed();
        Self { inner }
    }

    /// An object with no parts
    pub fn empty() -> Self {
        Self {
            inner: futures::stream::empty().boxed(),
        }
    }

    /// Read the object as one byte stream
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.map_err(|e| match e {
            ClientError::Stream(io) => io,
            other => io::Error::other(other),
        }))
    }

    /// Collect every part into one buffer
    pub async fn collect_vec(self) -> Result<Vec<u8>> {
        self.try_fold(Vec::new(), |mut buf, part| async move {
            buf.extend_from_slice(&part);
            Ok(buf)
        })
        .await
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
