//! In-memory object store for testing and local development

use crate::{ByteRange, ByteStream, ObjectMetadata, ObjectStore, Result, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Size of the pieces a range body is split into
const BODY_PIECE_SIZE: usize = 64 * 1024;

/// Counters of the calls a store has served
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub head_calls: usize,
    pub range_calls: usize,
    pub list_calls: usize,
}

impl StoreStats {
    /// Calls that touched object data or metadata
    pub fn object_calls(&self) -> usize {
        self.head_calls + self.range_calls
    }
}

#[derive(Default)]
struct Counters {
    head: AtomicUsize,
    range: AtomicUsize,
    list: AtomicUsize,
}

/// An in-memory object store
#[derive(Clone)]
pub struct MemoryObjectStore {
    buckets: Arc<DashMap<String, DashMap<String, Bytes>>>,
    counters: Arc<Counters>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a bucket (no-op if it exists)
    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.entry(bucket.to_string()).or_default();
    }

    /// Store an object, creating its bucket if needed
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
    }

    /// Number of objects across all buckets
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.value().len()).sum()
    }

    /// Check if the store holds no objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate the store going down (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of the calls served so far
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            head_calls: self.counters.head.load(Ordering::SeqCst),
            range_calls: self.counters.range.load(Ordering::SeqCst),
            list_calls: self.counters.list.load(Ordering::SeqCst),
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.counters.head.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let data = self.lookup(bucket, key)?;
        Ok(ObjectMetadata {
            size: data.len() as u64,
        })
    }

    async fn get_range(&self, bucket: &str, key: &str, range: ByteRange) -> Result<ByteStream> {
        self.counters.range.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let data = self.lookup(bucket, key)?;

        let size = data.len() as u64;
        if range.start >= size {
            return Err(StoreError::Unexpected(format!(
                "range {} not satisfiable for object of {} bytes",
                range, size
            )));
        }
        // Like S3, an end past the object is clamped
        let end = range.end.min(size - 1);
        let body = data.slice(range.start as usize..=end as usize);

        let pieces: Vec<Result<Bytes>> = (0..body.len())
            .step_by(BODY_PIECE_SIZE)
            .map(|offset| Ok(body.slice(offset..(offset + BODY_PIECE_SIZE).min(body.len()))))
            .collect();
        Ok(stream::iter(pieces).boxed())
    }

    async fn list_buckets(&self) -> Result<()> {
        self.counters.list.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, piece| async move {
                acc.extend_from_slice(&piece);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_head_and_range() {
        let store = MemoryObjectStore::new();
        store.put_object("bucket", "hello.txt", &b"Hello, World!"[..]);

        let meta = store.head_object("bucket", "hello.txt").await.unwrap();
        assert_eq!(meta.size, 13);

        let stream = store
            .get_range("bucket", "hello.txt", ByteRange::new(7, 11))
            .await
            .unwrap();
        assert_eq!(collect(stream).await, b"World");

        let stats = store.stats();
        assert_eq!(stats.head_calls, 1);
        assert_eq!(stats.range_calls, 1);
    }

    #[tokio::test]
    async fn test_memory_store_large_range_is_split() {
        let store = MemoryObjectStore::new();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        store.put_object("bucket", "big", data.clone());

        let stream = store
            .get_range("bucket", "big", ByteRange::new(0, 199_999))
            .await
            .unwrap();
        let pieces: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces.concat(), data);
    }

    #[tokio::test]
    async fn test_memory_store_not_found() {
        let store = MemoryObjectStore::new();
        store.create_bucket("bucket");

        let result = store.head_object("bucket", "missing.txt").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        let result = store.head_object("nope", "missing.txt").await;
        assert!(matches!(result, Err(StoreError::BucketNotFound(_))));
    }

    #[tokio::test]
    async fn test_memory_store_unavailable() {
        let store = MemoryObjectStore::new();
        assert!(store.list_buckets().await.is_ok());

        store.set_available(false);
        let err = store.list_buckets().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.stats().list_calls, 2);
    }
}
