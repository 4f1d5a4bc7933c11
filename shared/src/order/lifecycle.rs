//! Order lifecycle state machine
//!
//! ```text
//! pending ──► preparing ──► ready ──► completed
//!    │
//!    └──────► cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal. Local transitions must target the
//! single next state (or `cancelled` from `pending`); anything else is rejected
//! before it reaches the network.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::{AppError, ErrorCode};

/// 订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Single forward-progression target, `None` for terminal states
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Ready),
            OrderStatus::Ready => Some(OrderStatus::Completed),
            OrderStatus::Completed | OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Whether `self -> to` is a single edge of the lifecycle graph
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        self.next() == Some(to) || (self == OrderStatus::Pending && to == OrderStatus::Cancelled)
    }

    /// Edges walked from `self` to reach `target`
    ///
    /// Empty when `target == self`, `None` when `target` is not reachable
    /// (a regression, or `cancelled` from anything but `pending`).
    pub fn path_to(self, target: OrderStatus) -> Option<Vec<OrderStatus>> {
        if self == target {
            return Some(Vec::new());
        }
        if target == OrderStatus::Cancelled {
            return (self == OrderStatus::Pending).then(|| vec![OrderStatus::Cancelled]);
        }

        let mut path = Vec::new();
        let mut current = self;
        while let Some(next) = current.next() {
            path.push(next);
            if next == target {
                return Some(path);
            }
            current = next;
        }
        None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested status is not reachable from the current one
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for order {order_id}: {from} -> {to}")]
pub struct InvalidTransitionError {
    pub order_id: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl From<InvalidTransitionError> for AppError {
    fn from(err: InvalidTransitionError) -> Self {
        AppError::with_message(ErrorCode::InvalidTransition, err.to_string())
            .with_detail("order_id", err.order_id)
            .with_detail("from", err.from.as_str())
            .with_detail("to", err.to.as_str())
    }
}

/// Emitted for every accepted transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub order_id: String,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
}

/// Validate a requested transition and produce its lifecycle event
pub fn transition(
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<LifecycleEvent, InvalidTransitionError> {
    if !from.can_transition_to(to) {
        return Err(InvalidTransitionError {
            order_id: order_id.to_string(),
            from,
            to,
        });
    }

    Ok(LifecycleEvent {
        order_id: order_id.to_string(),
        from_status: from,
        to_status: to,
    })
}

/// Advance to the next state in the forward chain
pub fn advance(order_id: &str, from: OrderStatus) -> Result<LifecycleEvent, InvalidTransitionError> {
    // Terminal states have no next; report the attempt as a self-transition
    let to = from.next().unwrap_or(from);
    transition(order_id, from, to)
}
