//! Client error types

use partstream_core::Code;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway failed the call
    #[error("call failed ({code}): {message}")]
    Rpc { code: Code, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The part stream broke off or carried a malformed frame
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// Invalid response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Status code of a failed call
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(Code::NotFound)
    }
}
