//! Chunked retrieval engine.
//!
//! Turns one `(bucket, key)` request into an ordered sequence of range
//! fetches and hands each fetched part to a [`ResponseSink`]. Parts are
//! fetched and sent strictly one at a time, in byte order; memory use is
//! bounded by one part.

use crate::error::{Location, Result, RetrievalError};
use crate::plan::PartPlan;
use crate::sink::{ResponseChunk, ResponseSink};
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use partstream_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

/// Request to stream one object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
}

impl RetrievalRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Both bucket and key are required
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(RetrievalError::InvalidArgument("key is required".into()));
        }
        if self.bucket.is_empty() {
            return Err(RetrievalError::InvalidArgument("bucket is required".into()));
        }
        Ok(())
    }
}

/// Streams objects from an [`ObjectStore`] part by part
#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<dyn ObjectStore>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Stream `request` into `sink`.
    ///
    /// Parts already handed to the sink stay sent when a later part fails;
    /// the caller sees a truncated stream followed by the returned error.
    /// `cancel` is checked before every fetch and every send.
    #[instrument(skip_all, fields(bucket = %request.bucket, key = %request.key))]
    pub async fn retrieve<S>(
        &self,
        request: &RetrievalRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: ResponseSink + ?Sized,
    {
        request.validate()?;
        let (bucket, key) = (request.bucket.as_str(), request.key.as_str());

        let metadata = self
            .store
            .head_object(bucket, key)
            .await
            .map_err(|e| RetrievalError::from_store(e, Location::object(bucket, key)))?;

        let parts = PartPlan::for_size(metadata.size);
        debug!(size = metadata.size, parts = parts.len(), "planned download");

        for part in parts {
            let location = Location::part(bucket, key, part.index);

            if cancel.is_cancelled() {
                return Err(RetrievalError::Cancelled { location });
            }
            let bytes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetrievalError::Cancelled { location }),
                fetched = self.fetch_part(bucket, key, &part) => fetched?,
            };

            if cancel.is_cancelled() {
                return Err(RetrievalError::Cancelled { location });
            }
            if let Err(source) = sink.send(ResponseChunk { bytes }).await {
                error!(part = part.index, error = %source, "failed to send part");
                return Err(RetrievalError::Send { location, source });
            }
            debug!(part = part.index, len = part.len(), "sent part");
        }

        Ok(())
    }

    /// Fetch one part and drain its body into a single buffer
    async fn fetch_part(&self, bucket: &str, key: &str, part: &PartPlan) -> Result<Bytes> {
        let location = || Location::part(bucket, key, part.index);
        let expected = part.len() as usize;

        let mut body = self
            .store
            .get_range(bucket, key, part.range)
            .await
            .map_err(|e| RetrievalError::from_store(e, location()))?;

        let mut buf = BytesMut::with_capacity(expected);
        while let Some(piece) = body
            .try_next()
            .await
            .map_err(|e| RetrievalError::from_store(e, location()))?
        {
            if buf.len() + piece.len() > expected {
                return Err(RetrievalError::Internal {
                    location: location(),
                    reason: format!("store returned more than the {} bytes requested", expected),
                });
            }
            buf.extend_from_slice(&piece);
        }

        if buf.len() != expected {
            return Err(RetrievalError::Internal {
                location: location(),
                reason: format!("short read: got {} of {} bytes", buf.len(), expected),
            });
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;
    use crate::plan::PART_SIZE;
    use crate::sink::VecSink;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use partstream_store::{
        ByteRange, ByteStream, MemoryObjectStore, ObjectMetadata, StoreError,
    };

    const MIB: usize = 1 << 20;

    fn object(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn engine_with(bucket: &str, key: &str, data: Vec<u8>) -> (RetrievalEngine, MemoryObjectStore) {
        let store = MemoryObjectStore::new();
        store.put_object(bucket, key, data);
        (RetrievalEngine::new(Arc::new(store.clone())), store)
    }

    async fn run(engine: &RetrievalEngine, bucket: &str, key: &str) -> (Result<()>, VecSink) {
        let mut sink = VecSink::new();
        let result = engine
            .retrieve(
                &RetrievalRequest::new(bucket, key),
                &mut sink,
                &CancellationToken::new(),
            )
            .await;
        (result, sink)
    }

    /// Fails range fetches at or past `fail_from`
    struct FlakyStore {
        inner: MemoryObjectStore,
        fail_from: u64,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn head_object(&self, bucket: &str, key: &str) -> partstream_store::Result<ObjectMetadata> {
            self.inner.head_object(bucket, key).await
        }

        async fn get_range(
            &self,
            bucket: &str,
            key: &str,
            range: ByteRange,
        ) -> partstream_store::Result<ByteStream> {
            if range.start >= self.fail_from {
                return Err(StoreError::Unavailable("connection reset by peer".into()));
            }
            self.inner.get_range(bucket, key, range).await
        }

        async fn list_buckets(&self) -> partstream_store::Result<()> {
            self.inner.list_buckets().await
        }
    }

    /// Reports a size larger than the bytes it serves
    struct TruncatingStore;

    #[async_trait]
    impl ObjectStore for TruncatingStore {
        async fn head_object(&self, _: &str, _: &str) -> partstream_store::Result<ObjectMetadata> {
            Ok(ObjectMetadata { size: 10 })
        }

        async fn get_range(&self, _: &str, _: &str, _: ByteRange) -> partstream_store::Result<ByteStream> {
            Ok(stream::iter(vec![Ok(Bytes::from_static(b"short"))]).boxed())
        }

        async fn list_buckets(&self) -> partstream_store::Result<()> {
            Ok(())
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_small_object_is_one_chunk() {
        let data = object(2 * MIB);
        let (engine, _) = engine_with("testbucket", "test.txt", data.clone());

        let (result, sink) = run(&engine, "testbucket", "test.txt").await;
        result.unwrap();
        assert_eq!(sink.lengths(), vec![2 * MIB]);
        assert_eq!(sink.concat(), data);
    }

    #[tokio::test]
    async fn test_one_byte_over_part_size_is_two_chunks() {
        let data = object(PART_SIZE as usize + 1);
        let (engine, store) = engine_with("testbucket", "big.bin", data.clone());

        let (result, sink) = run(&engine, "testbucket", "big.bin").await;
        result.unwrap();
        assert_eq!(sink.lengths(), vec![PART_SIZE as usize, 1]);
        assert_eq!(sink.concat(), data);
        assert_eq!(store.stats().head_calls, 1);
        assert_eq!(store.stats().range_calls, 2);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_part_size() {
        let data = object(2 * PART_SIZE as usize);
        let (engine, _) = engine_with("testbucket", "even.bin", data.clone());

        let (result, sink) = run(&engine, "testbucket", "even.bin").await;
        result.unwrap();
        assert_eq!(sink.lengths(), vec![PART_SIZE as usize; 2]);
        assert_eq!(sink.concat(), data);
    }

    #[tokio::test]
    async fn test_empty_object_streams_nothing() {
        let (engine, store) = engine_with("testbucket", "empty", Vec::new());

        let (result, sink) = run(&engine, "testbucket", "empty").await;
        result.unwrap();
        assert!(sink.chunks.is_empty());
        assert_eq!(store.stats().range_calls, 0);
    }

    #[tokio::test]
    async fn test_missing_object_and_bucket() {
        let (engine, _) = engine_with("testbucket", "test.txt", object(16));

        let (result, sink) = run(&engine, "testbucket", "missing.txt").await;
        assert_eq!(result.unwrap_err().code(), Code::NotFound);
        assert!(sink.chunks.is_empty());

        let (result, sink) = run(&engine, "nobucket", "test.txt").await;
        assert_eq!(result.unwrap_err().code(), Code::NotFound);
        assert!(sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_validation_happens_before_store_access() {
        let (engine, store) = engine_with("testbucket", "test.txt", object(16));

        let (result, _) = run(&engine, "testbucket", "").await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.to_string(), "key is required");

        let (result, _) = run(&engine, "", "test.txt").await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.to_string(), "bucket is required");

        assert_eq!(store.stats().object_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_fetch() {
        let (engine, store) = engine_with("testbucket", "big.bin", object(PART_SIZE as usize + 1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut sink = VecSink::new();
        let err = engine
            .retrieve(&RetrievalRequest::new("testbucket", "big.bin"), &mut sink, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
        assert_eq!(err.part(), Some(0));
        assert_eq!(store.stats().range_calls, 0);
        assert!(sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_sent_parts() {
        let data = object(2 * PART_SIZE as usize + 10);
        let inner = MemoryObjectStore::new();
        inner.put_object("testbucket", "big.bin", data.clone());
        let engine = RetrievalEngine::new(Arc::new(FlakyStore {
            inner,
            fail_from: PART_SIZE,
        }));

        let (result, sink) = run(&engine, "testbucket", "big.bin").await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.part(), Some(1));
        assert!(err.to_string().contains("testbucket/big.bin part 1"));
        assert_eq!(sink.lengths(), vec![PART_SIZE as usize]);
        assert_eq!(sink.concat(), &data[..PART_SIZE as usize]);
    }

    #[test_log::test(tokio::test)]
    async fn test_send_failure_aborts_without_retry() {
        let (engine, store) = engine_with("testbucket", "big.bin", object(3 * PART_SIZE as usize));

        let mut sink = VecSink::failing_after(1);
        let err = engine
            .retrieve(
                &RetrievalRequest::new("testbucket", "big.bin"),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Send { .. }));
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.part(), Some(1));
        assert_eq!(sink.chunks.len(), 1);
        // The failed part was fetched once; the third was never fetched
        assert_eq!(store.stats().range_calls, 2);
    }

    #[tokio::test]
    async fn test_short_read_is_internal_error() {
        let engine = RetrievalEngine::new(Arc::new(TruncatingStore));

        let (result, sink) = run(&engine, "testbucket", "odd").await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().contains("short read"));
        assert!(sink.chunks.is_empty());
    }
}
