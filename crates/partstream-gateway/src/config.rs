//! Gateway configuration

use partstream_core::{FRAME_HEADER_LEN, PART_SIZE};
use partstream_store::S3Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// S3 endpoint URL
    pub s3_endpoint: String,
    /// S3 signing region
    pub s3_region: String,
    /// S3 access key
    #[serde(skip_serializing)]
    pub s3_access_key: Option<String>,
    /// S3 secret key
    #[serde(skip_serializing)]
    pub s3_secret_key: Option<String>,
    /// S3 session token
    #[serde(skip_serializing)]
    pub s3_session_token: Option<String>,
    /// Bucket used by the liveness probe
    pub health_bucket: Option<String>,
    /// Seconds between health probes
    pub health_check_interval_secs: u64,
    /// Log verbosity (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,
    /// Elasticsearch URL logs are shipped to
    pub elasticsearch_url: Option<String>,
    /// Prefix of the daily log index
    pub log_index: String,
    /// Label namespacing this process's logs
    pub host_name: String,
    /// Methods whose payloads are never logged. Download responses are
    /// never logged regardless.
    pub payload_log_ignore: Vec<String>,
    /// Largest message accepted or sent, in bytes
    pub max_message_size: usize,
    /// Use in-memory storage (for testing/development)
    pub use_memory_store: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            s3_endpoint: "http://localhost:9000".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_access_key: None,
            s3_secret_key: None,
            s3_session_token: None,
            health_bucket: None,
            health_check_interval_secs: 3,
            log_level: "error".to_string(),
            elasticsearch_url: None,
            log_index: "log".to_string(),
            host_name: "partstream-gateway".to_string(),
            payload_log_ignore: Vec::new(),
            max_message_size: 10 << 20, // 10 MiB
            use_memory_store: false,
        }
    }
}

impl GatewayConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Interval between health probes
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Store configuration derived from the S3 settings
    pub fn s3_config(&self) -> S3Config {
        S3Config {
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            session_token: self.s3_session_token.clone(),
            health_bucket: self.health_bucket.clone(),
            ..Default::default()
        }
    }

    /// Add methods to the payload logging denylist, skipping duplicates
    pub fn ignore_payloads_of<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for method in methods {
            let method = method.into();
            if !method.is_empty() && !self.payload_log_ignore.contains(&method) {
                self.payload_log_ignore.push(method);
            }
        }
        self
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let min_message_size = PART_SIZE as usize + FRAME_HEADER_LEN;
        if self.max_message_size < min_message_size {
            anyhow::bail!(
                "max message size {} is below one framed part ({} bytes)",
                self.max_message_size,
                min_message_size
            );
        }
        if self.health_check_interval_secs == 0 {
            anyhow::bail!("health check interval must be at least one second");
        }
        Ok(())
    }
}
