//! Order Module
//!
//! - Types: the order projection held by the kitchen display
//! - Lifecycle: status state machine and lifecycle events

pub mod lifecycle;
pub mod types;

// Re-exports
pub use lifecycle::{InvalidTransitionError, LifecycleEvent, OrderStatus};
pub use types::{Order, OrderItem};
