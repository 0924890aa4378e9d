//! Error types for the retrieval pipeline

use crate::sink::SinkError;
use partstream_store::StoreError;
use std::fmt;
use thiserror::Error;

/// Result type alias using `RetrievalError`
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Status code of a failed call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    InvalidArgument,
    NotFound,
    Unavailable,
    Internal,
    Cancelled,
}

impl Code {
    /// Get the code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::Unavailable => "Unavailable",
            Self::Internal => "Internal",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Parse a code string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "InvalidArgument" => Some(Self::InvalidArgument),
            "NotFound" => Some(Self::NotFound),
            "Unavailable" => Some(Self::Unavailable),
            "Internal" => Some(Self::Internal),
            "Cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the caller, rather than the server, caused the failure
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidArgument | Self::NotFound | Self::Cancelled)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in a download a failure happened
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub bucket: String,
    pub key: String,
    /// Part index, when the failure is tied to one part
    pub part: Option<u64>,
}

impl Location {
    pub fn object(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            part: None,
        }
    }

    pub fn part(bucket: &str, key: &str, part: u64) -> Self {
        Self {
            part: Some(part),
            ..Self::object(bucket, key)
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)?;
        if let Some(part) = self.part {
            write!(f, " part {}", part)?;
        }
        Ok(())
    }
}

/// Terminal error of a retrieval
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Request failed validation; the store was not contacted
    #[error("{0}")]
    InvalidArgument(String),

    /// Object or bucket does not exist
    #[error("failed to download object {location}: {source}")]
    NotFound {
        location: Location,
        #[source]
        source: StoreError,
    },

    /// Store unreachable or temporarily failing
    #[error("failed to download object {location}: {source}")]
    Unavailable {
        location: Location,
        #[source]
        source: StoreError,
    },

    /// Store answered in a way the engine cannot use
    #[error("failed to download object {location}: {reason}")]
    Internal { location: Location, reason: String },

    /// The peer could not be sent a part
    #[error("failed to send {location}: {source}")]
    Send {
        location: Location,
        #[source]
        source: SinkError,
    },

    /// Caller cancelled or the deadline expired
    #[error("download of {location} cancelled")]
    Cancelled { location: Location },
}

impl RetrievalError {
    /// Classify a store error, attaching where it happened
    pub fn from_store(source: StoreError, location: Location) -> Self {
        match source {
            StoreError::NotFound { .. } | StoreError::BucketNotFound(_) | StoreError::AccessDenied(_) => {
                Self::NotFound { location, source }
            }
            StoreError::Unavailable(_) | StoreError::Io(_) => Self::Unavailable { location, source },
            StoreError::Unexpected(_) | StoreError::Configuration(_) => Self::Internal {
                location,
                reason: source.to_string(),
            },
        }
    }

    /// Get the status code
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NotFound { .. } => Code::NotFound,
            Self::Unavailable { .. } => Code::Unavailable,
            Self::Internal { .. } | Self::Send { .. } => Code::Internal,
            Self::Cancelled { .. } => Code::Cancelled,
        }
    }

    /// Index of the part the failure is tied to
    pub fn part(&self) -> Option<u64> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::NotFound { location, .. }
            | Self::Unavailable { location, .. }
            | Self::Internal { location, .. }
            | Self::Send { location, .. }
            | Self::Cancelled { location } => location.part,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let location = Location::object("testbucket", "missing.txt");
        let err = RetrievalError::from_store(
            StoreError::NotFound {
                bucket: "testbucket".into(),
                key: "missing.txt".into(),
            },
            location.clone(),
        );
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(
            err.to_string(),
            "failed to download object testbucket/missing.txt: object not found: testbucket/missing.txt"
        );

        let err = RetrievalError::from_store(StoreError::AccessDenied("403".into()), location.clone());
        assert_eq!(err.code(), Code::NotFound);

        let err = RetrievalError::from_store(
            StoreError::Unavailable("connection reset".into()),
            Location::part("testbucket", "big.bin", 3),
        );
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.part(), Some(3));
        assert!(err.to_string().contains("testbucket/big.bin part 3"));

        let err = RetrievalError::from_store(StoreError::Unexpected("bad xml".into()), location);
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_code_roundtrip_and_class() {
        for code in [
            Code::InvalidArgument,
            Code::NotFound,
            Code::Unavailable,
            Code::Internal,
            Code::Cancelled,
        ] {
            assert_eq!(Code::parse(code.as_str()), Some(code));
        }
        assert_eq!(Code::parse("Bogus"), None);
        assert!(Code::NotFound.is_client_error());
        assert!(!Code::Unavailable.is_client_error());
    }
}
