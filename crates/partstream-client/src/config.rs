//! Client configuration

use partstream_core::PART_SIZE;
use std::time::Duration;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Gateway endpoint URL
    pub endpoint: String,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Deadline sent with each download, if any
    pub deadline: Option<Duration>,
    /// User agent string
    pub user_agent: String,
    /// Largest frame payload accepted
    pub max_frame_len: usize,
    /// `traceparent` value forwarded with every call
    pub trace_parent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            connect_timeout: Duration::from_secs(10),
            deadline: None,
            user_agent: format!("partstream-client/{}", env!("CARGO_PKG_VERSION")),
            max_frame_len: PART_SIZE as usize,
            trace_parent: None,
        }
    }
}

impl Config {
    /// Create a new config with the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Forward a trace context with every call
    pub fn with_trace_parent(mut self, trace_parent: impl Into<String>) -> Self {
        self.trace_parent = Some(trace_parent.into());
        self
    }

    /// Ask the gateway to cancel downloads running longer than `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// URL of a method on the gateway
    pub fn method_url(&self, method: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), method)
    }
}

/// Render a duration in gRPC timeout syntax, at millisecond precision
pub(crate) fn grpc_timeout(deadline: Duration) -> String {
    let millis = deadline.as_millis().max(1);
    if millis < 100_000_000 {
        format!("{}m", millis)
    } else {
        format!("{}S", deadline.as_secs().min(99_999_999))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url() {
        let config = Config::new("http://gw:8080/");
        assert_eq!(
            config.method_url("/download.Download/Download"),
            "http://gw:8080/download.Download/Download"
        );
    }

    #[test]
    fn test_grpc_timeout() {
        assert_eq!(grpc_timeout(Duration::from_millis(500)), "500m");
        assert_eq!(grpc_timeout(Duration::from_micros(10)), "1m");
        assert_eq!(grpc_timeout(Duration::from_secs(200_000)), "200000S");
    }
}
