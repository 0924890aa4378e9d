//! # Partstream
//!
//! Chunked downloads from S3-compatible object stores.
//!
//! - [`store`]: the object store seam, with S3 and in-memory backends
//! - [`retrieval`]: part planning and the retrieval engine
//! - [`gateway`]: the RPC service exposing the engine
//! - [`client`]: a client for the gateway

pub use partstream_client as client;
pub use partstream_core as retrieval;
pub use partstream_gateway as gateway;
pub use partstream_store as store;
