//! # Partstream Client
//!
//! Client for the partstream download gateway.
//!
//! ## Example
//!
//! ```rust,ignore
//! use partstream_client::{Config, DownloadClient};
//! use futures::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DownloadClient::new(Config::new("http://localhost:8080"))?;
//!
//!     // One item per 5 MiB part
//!     let mut parts = client.download("my-bucket", "big.bin").await?;
//!     while let Some(part) = parts.try_next().await? {
//!         println!("received {} bytes", part.len());
//!     }
//!
//!     // Or the whole object at once
//!     let data = client.download_to_vec("my-bucket", "small.txt").await?;
//!     println!("Content: {}", String::from_utf8_lossy(&data));
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod stream;

pub use client::{DownloadClient, ServingStatus};
pub use config::Config;
pub use error::{ClientError, Result};
pub use partstream_core::Code;
pub use stream::ChunkStream;
