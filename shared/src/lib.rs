//! Shared types for the kitchen display engine
//!
//! Wire types used by both the network client and the engine: orders and
//! their lifecycle, stations, the realtime message protocol and error codes.

pub mod error;
pub mod message;
pub mod models;
pub mod order;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{AppError, AppResult, ErrorCode};
pub use message::{ClientMessage, ServerMessage};
pub use models::{Station, StationStats};
pub use order::{InvalidTransitionError, LifecycleEvent, Order, OrderItem, OrderStatus};
