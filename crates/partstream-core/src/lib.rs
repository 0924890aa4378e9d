//! # Partstream Core
//!
//! Chunked retrieval pipeline for the partstream download gateway.
//!
//! This crate provides:
//! - **Part planning**: split an object into contiguous 5 MiB byte ranges
//! - **Retrieval engine**: fetch parts in order and hand each to a sink
//! - **Response sinks**: the "send one message to the peer" abstraction
//! - **Trace context**: parse `traceparent` values into trace ids
//! - **Framing**: the length-delimited codec that carries one part per frame
//!
//! ## Example
//!
//! ```rust,ignore
//! use partstream_core::{ChannelSink, RetrievalEngine, RetrievalRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = RetrievalEngine::new(store);
//! let (mut sink, mut rx) = ChannelSink::new(1);
//! let request = RetrievalRequest::new("testbucket", "test.txt");
//! engine.retrieve(&request, &mut sink, &CancellationToken::new()).await?;
//! ```

pub mod engine;
pub mod error;
pub mod frame;
pub mod plan;
pub mod sink;
pub mod trace;

pub use engine::{RetrievalEngine, RetrievalRequest};
pub use error::{Code, Location, Result, RetrievalError};
pub use frame::{encode_frame, frame_codec, FRAME_HEADER_LEN};
pub use plan::{part_count, PartPlan, PartPlanIter, PART_SIZE};
pub use sink::{ChannelSink, ResponseChunk, ResponseSink, SinkError, VecSink};
pub use trace::{
    TraceContext, ELASTIC_TRACEPARENT_HEADER, TRACEPARENT_HEADER, TRACE_HEADERS,
};
