//! Unified error codes for the kitchen display engine
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Order errors
//! - 5xxx: Sync / outbox errors
//! - 6xxx: Transport errors
//! - 7xxx: Station errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Represented as u16 so the same value can be shown on the display and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Malformed request or unreadable stored data
    InvalidRequest = 5,

    // ==================== 4xxx: Order ====================
    /// Requested status is not reachable from the current one
    InvalidTransition = 4001,
    /// Order is not in the active set
    OrderNotFound = 4002,
    /// An older payload lost against a newer one
    StaleData = 4003,

    // ==================== 5xxx: Sync ====================
    /// Status mutation could not be delivered
    SyncFailed = 5001,
    /// Outbox entry exceeded its retry cap and needs an operator
    OutboxEntryFailed = 5002,
    /// Outbox entry does not exist
    OutboxEntryNotFound = 5003,

    // ==================== 6xxx: Transport ====================
    /// Realtime connection lost
    ConnectionLost = 6001,
    /// Realtime channel was closed explicitly
    ConnectionClosed = 6002,

    // ==================== 7xxx: Station ====================
    /// Station is not configured
    StationNotFound = 7001,

    // ==================== 9xxx: System ====================
    /// Internal error
    InternalError = 9001,
    /// Local storage error
    StorageError = 9002,
    /// Configuration error
    ConfigError = 9003,
}

impl ErrorCode {
    /// Numeric value of this code
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Default message for this code
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "Invalid request",

            ErrorCode::InvalidTransition => "Status transition not allowed",
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::StaleData => "Stale order data",

            ErrorCode::SyncFailed => "Status update could not be sent",
            ErrorCode::OutboxEntryFailed => "Queued update needs attention",
            ErrorCode::OutboxEntryNotFound => "Queued update not found",

            ErrorCode::ConnectionLost => "Connection lost",
            ErrorCode::ConnectionClosed => "Connection closed",

            ErrorCode::StationNotFound => "Station not found",

            ErrorCode::InternalError => "Internal error",
            ErrorCode::StorageError => "Storage error",
            ErrorCode::ConfigError => "Configuration error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error returned when converting an unknown u16 into [`ErrorCode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            5 => Ok(ErrorCode::InvalidRequest),

            // Order
            4001 => Ok(ErrorCode::InvalidTransition),
            4002 => Ok(ErrorCode::OrderNotFound),
            4003 => Ok(ErrorCode::StaleData),

            // Sync
            5001 => Ok(ErrorCode::SyncFailed),
            5002 => Ok(ErrorCode::OutboxEntryFailed),
            5003 => Ok(ErrorCode::OutboxEntryNotFound),

            // Transport
            6001 => Ok(ErrorCode::ConnectionLost),
            6002 => Ok(ErrorCode::ConnectionClosed),

            // Station
            7001 => Ok(ErrorCode::StationNotFound),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::StorageError),
            9003 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::InvalidRequest.code(), 5);
        assert_eq!(ErrorCode::InvalidTransition.code(), 4001);
        assert_eq!(ErrorCode::OutboxEntryFailed.code(), 5002);
        assert_eq!(ErrorCode::ConnectionLost.code(), 6001);
        assert_eq!(ErrorCode::StationNotFound.code(), 7001);
        assert_eq!(ErrorCode::StorageError.code(), 9002);
    }

    #[test]
    fn test_try_from_roundtrip() {
        for code in [
            ErrorCode::InvalidRequest,
            ErrorCode::InvalidTransition,
            ErrorCode::StaleData,
            ErrorCode::SyncFailed,
            ErrorCode::ConnectionClosed,
            ErrorCode::ConfigError,
        ] {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(4999), Err(InvalidErrorCode(4999)));
        assert_eq!(
            InvalidErrorCode(4999).to_string(),
            "invalid error code: 4999"
        );
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&ErrorCode::InvalidTransition).unwrap();
        assert_eq!(json, "4001");

        let code: ErrorCode = serde_json::from_str("5002").unwrap();
        assert_eq!(code, ErrorCode::OutboxEntryFailed);

        assert!(serde_json::from_str::<ErrorCode>("12345").is_err());
        assert!(serde_json::from_str::<ErrorCode>("0").is_err());
    }

    #[test]
    fn test_message() {
        assert_eq!(ErrorCode::OrderNotFound.message(), "Order not found");
        assert_eq!(ErrorCode::OutboxEntryFailed.message(), "Queued update needs attention");
    }
}
