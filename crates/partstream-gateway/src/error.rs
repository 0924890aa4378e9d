//! Error types and their mapping onto responses

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use partstream_core::{Code, RetrievalError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the call's status code on error responses
pub const RPC_CODE_HEADER: &str = "x-rpc-code";

/// HTTP status used for cancelled calls ("client closed request")
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Get the HTTP status of a status code
pub fn status_code(code: Code) -> StatusCode {
    match code {
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Cancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
        }
    }
}

/// Body of an error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("{message}")]
    Rpc { code: Code, message: String },
}

impl ApiError {
    /// Create an error with an explicit code
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Get the error code
    pub fn code(&self) -> Code {
        match self {
            Self::Retrieval(e) => e.code(),
            Self::Rpc { code, .. } => *code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = ErrorBody {
            code: code.as_str().to_string(),
            message: self.to_string(),
        };

        let mut response = (status_code(code), Json(body)).into_response();
        response
            .headers_mut()
            .insert(RPC_CODE_HEADER, HeaderValue::from_static(code.as_str()));
        response
    }
}
