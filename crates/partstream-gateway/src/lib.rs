//! # Partstream Gateway
//!
//! Re-exposes objects of an S3-compatible store as a server-streamed call,
//! one 5 MiB part per message, with trace-correlated logging around every
//! call.
//!
//! This crate provides:
//! - **Download call**: `POST /download.Download/Download`, streamed parts
//! - **Health check**: `/grpc.health.v1.Health/Check`, fed by a background monitor
//! - **Interceptor chain**: trace id, payload and outcome logging middleware
//! - **Log sink**: optional shipping of structured logs to Elasticsearch
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     RPC clients                     │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                 Partstream Gateway                   │
//! ├─────────────────────────────────────────────────────┤
//! │   Trace Layer │ Payload Layer │ Outcome Layer        │
//! ├─────────────────────────────────────────────────────┤
//! │   Download handler        │   Health handler        │
//! ├───────────────────────────┼─────────────────────────┤
//! │   partstream-core engine  │   Health monitor        │
//! ├───────────────────────────┴─────────────────────────┤
//! │                  partstream-store                    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod log_sink;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use health::{health_channel, HealthMonitor, HealthReporter, HealthState, ServingStatus};
pub use server::{run_server, run_server_with_shutdown, serve};
pub use state::AppState;
