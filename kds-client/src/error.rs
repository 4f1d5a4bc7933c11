//! Client error types

use reqwest::StatusCode;
use shared::error::{AppError, ErrorCode};
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid response format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Authentication required
    #[error("Authentication required")]
    Unauthorized,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server refused the request as sent (409/422 and other 4xx)
    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server-side failure (5xx)
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ClientError {
    /// Map a non-success status and its body text to an error
    pub fn from_status(status: StatusCode, text: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            StatusCode::NOT_FOUND => ClientError::NotFound(text),
            s if s.is_client_error() => ClientError::Rejected {
                status: s.as_u16(),
                message: text,
            },
            s => ClientError::Server {
                status: s.as_u16(),
                message: text,
            },
        }
    }

    /// Whether sending the same request later may succeed
    ///
    /// Transport failures, 5xx and 401 are transient (a token can be
    /// renewed); any other 4xx will be refused again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => !e.is_decode() && !e.is_builder(),
            ClientError::Server { .. } | ClientError::Unauthorized => true,
            _ => false,
        }
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        let code = match &err {
            ClientError::Http(_) => ErrorCode::ConnectionLost,
            ClientError::NotFound(_) => ErrorCode::OrderNotFound,
            ClientError::Rejected { .. } => ErrorCode::InvalidRequest,
            ClientError::Unauthorized => ErrorCode::InvalidRequest,
            ClientError::Server { .. } => ErrorCode::SyncFailed,
            ClientError::InvalidResponse(_) => ErrorCode::InternalError,
        };
        AppError::with_message(code, err.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
