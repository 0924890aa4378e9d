//! Main client implementation

use crate::config::grpc_timeout;
use crate::{ChunkStream, ClientError, Config, Result};
use partstream_core::{Code, RetrievalRequest, TRACEPARENT_HEADER};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, instrument};

const DOWNLOAD_METHOD: &str = "/download.Download/Download";
const HEALTH_CHECK_METHOD: &str = "/grpc.health.v1.Health/Check";
const RPC_CODE_HEADER: &str = "x-rpc-code";

/// Serving status reported by the gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServingStatus {
    Serving,
    NotServing,
}

impl fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serving => f.write_str("SERVING"),
            Self::NotServing => f.write_str("NOT_SERVING"),
        }
    }
}

#[derive(Deserialize)]
struct HealthBody {
    status: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Download gateway client
pub struct DownloadClient {
    config: Config,
    http: Client,
}

impl DownloadClient {
    /// Create a new client with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| ClientError::Config("invalid user agent".to_string()))?,
        );
        if let Some(trace_parent) = &config.trace_parent {
            headers.insert(
                TRACEPARENT_HEADER,
                trace_parent
                    .parse()
                    .map_err(|_| ClientError::Config("invalid traceparent".to_string()))?,
            );
        }

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self { config, http })
    }

    /// Create with endpoint URL
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Self::new(Config::new(endpoint))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start downloading an object.
    ///
    /// Errors the gateway reports before the first part are returned here;
    /// later failures end the returned stream with an error.
    #[instrument(skip(self))]
    pub async fn download(&self, bucket: &str, key: &str) -> Result<ChunkStream> {
        let mut request = self
            .http
            .post(self.config.method_url(DOWNLOAD_METHOD))
            .json(&RetrievalRequest::new(bucket, key));
        if let Some(deadline) = self.config.deadline {
            request = request.header("grpc-timeout", grpc_timeout(deadline));
        }

        let response = check_status(request.send().await?).await?;
        debug!(status = %response.status(), "download started");

        Ok(ChunkStream::from_body(
            response.bytes_stream(),
            self.config.max_frame_len,
        ))
    }

    /// Download a whole object into memory
    pub async fn download_to_vec(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.download(bucket, key).await?.collect_vec().await
    }

    /// Ask the gateway whether it can reach its store
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<ServingStatus> {
        let response = self
            .http
            .get(self.config.method_url(HEALTH_CHECK_METHOD))
            .send()
            .await?;

        // NOT_SERVING comes with 503 and is still a valid answer
        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            return Err(error_from_response(response).await);
        }

        let body: HealthBody = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        match body.status.as_str() {
            "SERVING" => Ok(ServingStatus::Serving),
            "NOT_SERVING" => Ok(ServingStatus::NotServing),
            other => Err(ClientError::InvalidResponse(format!(
                "unknown serving status {}",
                other
            ))),
        }
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(response).await)
    }
}

/// Turn an error response into a [`ClientError::Rpc`]
async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let header_code = response
        .headers()
        .get(RPC_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(Code::parse);

    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return ClientError::Http(e),
    };

    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ClientError::Rpc {
            code: Code::parse(&body.code)
                .or(header_code)
                .unwrap_or_else(|| code_for_status(status)),
            message: body.message,
        },
        Err(_) => ClientError::Rpc {
            code: header_code.unwrap_or_else(|| code_for_status(status)),
            message: format!("HTTP {}: {}", status.as_u16(), text),
        },
    }
}

fn code_for_status(status: StatusCode) -> Code {
    match status.as_u16() {
        404 => Code::NotFound,
        499 => Code::Cancelled,
        503 => Code::Unavailable,
        400..=498 => Code::InvalidArgument,
        _ => Code::Internal,
    }
}
