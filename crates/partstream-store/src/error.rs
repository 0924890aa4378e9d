//! Error types for the partstream-store crate

use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the object store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object not found
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket not found
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Access denied by the store
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Store unreachable or temporarily failing
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Response the client did not expect
    #[error("unexpected store response: {0}")]
    Unexpected(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO error while reading a body
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Object or bucket does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::BucketNotFound(_))
    }

    /// Failure that may go away on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Unexpected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let missing = StoreError::NotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_transient());
        assert_eq!(missing.to_string(), "object not found: b/k");

        assert!(StoreError::BucketNotFound("b".into()).is_not_found());
        assert!(StoreError::Unavailable("reset".into()).is_transient());
        assert!(!StoreError::AccessDenied("nope".into()).is_transient());
    }
}
