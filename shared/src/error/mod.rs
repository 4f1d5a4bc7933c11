//! Unified error system for the kitchen display engine
//!
//! - [`ErrorCode`]: Standardized error codes
//! - [`AppError`]: Rich error type with codes, messages, and details
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 4xxx: Order errors
//! - 5xxx: Sync errors
//! - 6xxx: Transport errors
//! - 7xxx: Station errors
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode};
//!
//! let err = AppError::new(ErrorCode::InvalidTransition);
//! let err = AppError::with_message(ErrorCode::SyncFailed, "PATCH /orders/102/status failed")
//!     .with_detail("order_id", "102");
//! ```

mod codes;
mod types;

pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{AppError, AppResult};
