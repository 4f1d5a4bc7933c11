//! Application error type

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Application error with structured error code and details
///
/// Module errors (`ClientError`, `OutboxStorageError`, ...) all convert into
/// this type so the display layer only has to understand one shape.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AppError {
    /// The error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Value>>,
}

impl AppError {
    /// Create a new error with the default message for the error code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
        }
    }

    /// Create a new error with a custom message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add a detail entry to this error
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    // ==================== Convenience constructors ====================

    /// Create an order not found error
    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        let id = order_id.into();
        Self::with_message(ErrorCode::OrderNotFound, format!("Order {} not found", id))
            .with_detail("order_id", id)
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ConfigError, msg)
    }
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_new() {
        let err = AppError::new(ErrorCode::OrderNotFound);
        assert_eq!(err.code, ErrorCode::OrderNotFound);
        assert_eq!(err.message, "Order not found");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_app_error_with_detail() {
        let err = AppError::with_message(ErrorCode::SyncFailed, "PATCH failed")
            .with_detail("order_id", "102")
            .with_detail("attempts", 3);

        assert_eq!(err.code, ErrorCode::SyncFailed);
        let details = err.details.unwrap();
        assert_eq!(details.get("order_id").unwrap(), "102");
        assert_eq!(details.get("attempts").unwrap(), 3);
    }

    #[test]
    fn test_convenience_constructors() {
        let err = AppError::order_not_found("102");
        assert_eq!(err.code, ErrorCode::OrderNotFound);
        assert_eq!(err.message, "Order 102 not found");

        assert_eq!(
            err.details.unwrap().get("order_id").unwrap(),
            "102"
        );
        assert_eq!(AppError::config("bad").code, ErrorCode::ConfigError);
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::with_message(ErrorCode::StationNotFound, "Station grill not found");
        assert_eq!(format!("{}", err), "Station grill not found");
    }
}
