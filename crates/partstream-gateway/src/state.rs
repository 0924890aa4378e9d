//! Application state

use crate::config::GatewayConfig;
use crate::health::{health_channel, HealthReporter, HealthState};
use crate::middleware::{ignore_methods_decider, response_payload_decider, PayloadDecider};
use partstream_core::RetrievalEngine;
use partstream_store::{MemoryObjectStore, ObjectStore, S3ObjectStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Object store, shared by the engine and the health monitor
    pub store: Arc<dyn ObjectStore>,
    /// Chunked retrieval engine
    pub engine: RetrievalEngine,
    /// Serving status, as last reported by the health monitor
    pub health: HealthState,
    /// Which methods get their initial request logged
    pub request_decider: PayloadDecider,
    /// Which methods get their response messages logged
    pub payload_decider: PayloadDecider,
}

impl AppState {
    /// Create the application state and the writer of its health status.
    ///
    /// Fails when the configuration is invalid or the store session cannot
    /// be established.
    pub fn new(config: GatewayConfig) -> anyhow::Result<(Self, HealthReporter)> {
        config.validate()?;

        let store: Arc<dyn ObjectStore> = if config.use_memory_store {
            warn!("Using in-memory object store (data will not persist)");
            Arc::new(MemoryObjectStore::new())
        } else {
            let store = S3ObjectStore::new(config.s3_config())?;
            info!(endpoint = %config.s3_endpoint, region = %config.s3_region, "S3 session established");
            Arc::new(store)
        };

        Ok(Self::with_store(config, store))
    }

    /// Create the application state around an existing store
    pub fn with_store(config: GatewayConfig, store: Arc<dyn ObjectStore>) -> (Self, HealthReporter) {
        let (reporter, health) = health_channel();
        let request_decider = ignore_methods_decider(config.payload_log_ignore.clone());
        let payload_decider = response_payload_decider(config.payload_log_ignore.clone());

        let state = Self {
            engine: RetrievalEngine::new(Arc::clone(&store)),
            store,
            health,
            request_decider,
            payload_decider,
            config,
        };
        (state, reporter)
    }
}
