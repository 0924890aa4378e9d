//! S3-compatible object store backed by `opendal`

use crate::{ByteRange, ByteStream, ObjectMetadata, ObjectStore, Result, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use opendal::{services::S3, ErrorKind, Operator};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Configuration for an S3-compatible endpoint
#[derive(Clone, Debug)]
pub struct S3Config {
    /// Endpoint URL (e.g., "http://localhost:9000")
    pub endpoint: String,
    /// Signing region
    pub region: String,
    /// Access key id
    pub access_key: Option<String>,
    /// Secret access key
    pub secret_key: Option<String>,
    /// Session token for temporary credentials
    pub session_token: Option<String>,
    /// Bucket probed by the liveness check; without one the endpoint itself is probed
    pub health_bucket: Option<String>,
    /// Timeout of the endpoint liveness probe
    pub probe_timeout: Duration,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            session_token: None,
            health_bucket: None,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl S3Config {
    /// Create with a custom endpoint URL
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set static credentials
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }
}

/// S3 object store client.
///
/// Path-style addressing against a single endpoint. An `opendal` operator is
/// built lazily per bucket and reused for the life of the store.
pub struct S3ObjectStore {
    config: S3Config,
    http: Client,
    operators: DashMap<String, Operator>,
}

impl S3ObjectStore {
    /// Create a new S3 store, validating the endpoint and credentials configuration
    pub fn new(config: S3Config) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            StoreError::Configuration(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(StoreError::Configuration(format!(
                "unsupported endpoint scheme: {}",
                endpoint.scheme()
            )));
        }
        if config.access_key.is_some() != config.secret_key.is_some() {
            return Err(StoreError::Configuration(
                "access key and secret key must be set together".into(),
            ));
        }

        let http = Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;

        let store = Self {
            config,
            http,
            operators: DashMap::new(),
        };

        // Surface builder errors at startup rather than on the first call
        if let Some(bucket) = store.config.health_bucket.clone() {
            store.operator(&bucket)?;
        }

        Ok(store)
    }

    /// Get the configuration
    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn operator(&self, bucket: &str) -> Result<Operator> {
        if let Some(op) = self.operators.get(bucket) {
            return Ok(op.clone());
        }

        let mut builder = S3::default();
        builder
            .root("/")
            .bucket(bucket)
            .endpoint(&self.config.endpoint)
            .region(&self.config.region)
            .disable_config_load()
            .disable_ec2_metadata();
        match (&self.config.access_key, &self.config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                builder.access_key_id(access_key).secret_access_key(secret_key);
            }
            _ => {
                builder.allow_anonymous();
            }
        }
        if let Some(token) = &self.config.session_token {
            builder.security_token(token);
        }

        let op = Operator::new(builder)
            .map_err(|e| StoreError::Configuration(e.to_string()))?
            .finish();
        debug!(bucket, "created S3 operator");
        self.operators.insert(bucket.to_string(), op.clone());
        Ok(op)
    }

    async fn probe_endpoint(&self) -> Result<()> {
        let response = self.http.get(&self.config.endpoint).send().await?;
        // Any answer below 500 means the endpoint is up, even an auth rejection
        if response.status().is_server_error() {
            return Err(StoreError::Unavailable(format!(
                "endpoint answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn map_opendal_error(err: opendal::Error, bucket: &str, key: &str) -> StoreError {
    match err.kind() {
        ErrorKind::NotFound => StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        ErrorKind::PermissionDenied => StoreError::AccessDenied(err.to_string()),
        ErrorKind::ConfigInvalid => StoreError::Configuration(err.to_string()),
        ErrorKind::RateLimited => StoreError::Unavailable(err.to_string()),
        _ if err.is_temporary() => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Unexpected(err.to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let op = self.operator(bucket)?;
        let meta = op
            .stat(key)
            .await
            .map_err(|e| map_opendal_error(e, bucket, key))?;
        Ok(ObjectMetadata {
            size: meta.content_length(),
        })
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn get_range(&self, bucket: &str, key: &str, range: ByteRange) -> Result<ByteStream> {
        let op = self.operator(bucket)?;
        let buffer = op
            .read_with(key)
            .range(range.as_std())
            .await
            .map_err(|e| map_opendal_error(e, bucket, key))?;
        // Buffer is both an Iterator and a Stream
        Ok(stream::iter(Iterator::map(buffer, Ok::<_, StoreError>)).boxed())
    }

    async fn list_buckets(&self) -> Result<()> {
        match &self.config.health_bucket {
            Some(bucket) => self
                .operator(bucket)?
                .check()
                .await
                .map_err(|e| map_opendal_error(e, bucket, "")),
            None => self.probe_endpoint().await,
        }
    }
}
