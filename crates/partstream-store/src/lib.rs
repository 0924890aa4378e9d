//! # Partstream Store
//!
//! Object store capability layer for the partstream download gateway.
//!
//! This crate provides:
//! - **ObjectStore trait**: the three operations the gateway needs from a blob store
//!   (metadata probe, range fetch, liveness probe)
//! - **S3 backend**: any S3-compatible endpoint, through `opendal`
//! - **Memory backend**: in-process fixtures for tests and local development
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Chunked Retrieval Engine         │
//! │             Health Monitor              │
//! ├─────────────────────────────────────────┤
//! │           ObjectStore Trait             │
//! ├────────────────────┬────────────────────┤
//! │   S3ObjectStore    │ MemoryObjectStore  │
//! ├────────────────────┴────────────────────┤
//! │         S3-compatible endpoint          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use partstream_store::{ByteRange, ObjectStore, S3Config, S3ObjectStore};
//!
//! let store = S3ObjectStore::new(S3Config::with_endpoint("http://localhost:9000"))?;
//! let meta = store.head_object("bucket", "key").await?;
//! let stream = store.get_range("bucket", "key", ByteRange::new(0, meta.size - 1)).await?;
//! ```

pub mod error;
pub mod memory;
pub mod s3;

pub use error::{Result, StoreError};
pub use memory::{MemoryObjectStore, StoreStats};
pub use s3::{S3Config, S3ObjectStore};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;

/// Stream of bytes returned by a range fetch
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Inclusive byte range `[start, end]` of an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new inclusive range
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {} after end {}", start, end);
        Self { start, end }
    }

    /// Number of bytes covered by the range; never zero
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Half-open form, as accepted by most readers
    pub fn as_std(&self) -> std::ops::Range<u64> {
        self.start..self.end + 1
    }
}

impl fmt::Display for ByteRange {
    /// HTTP `Range` header value
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// Metadata returned by a metadata probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object size in bytes
    pub size: u64,
}

/// Capability surface of an S3-compatible blob store.
///
/// Implementations must be safe for concurrent use: the retrieval engine and
/// the health monitor share one instance and no per-call state is kept on it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch object metadata without retrieving content
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    /// Fetch the bytes of `range`
    async fn get_range(&self, bucket: &str, key: &str, range: ByteRange) -> Result<ByteStream>;

    /// Lightweight liveness probe against the store
    async fn list_buckets(&self) -> Result<()>;
}
