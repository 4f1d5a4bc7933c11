//! 实时推送协议
//!
//! JSON text frames tagged by `type`, exchanged over the realtime channel.
//!
//! Client → Server: `subscribe`
//! Server → Client: `new-order`, `order-status-updated`, `active-orders`, `subscribed`, `error`

use serde::{Deserialize, Serialize};

use crate::order::{Order, OrderStatus};

/// Channel the kitchen display subscribes to by default
pub const DEFAULT_CHANNEL: &str = "kds-orders";

/// Subscription handshake payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub channel: String,
}

/// Client → Server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Subscribe { payload: SubscribePayload },
}

impl ClientMessage {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        ClientMessage::Subscribe {
            payload: SubscribePayload {
                channel: channel.into(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Partial status update pushed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatePayload {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Server → Client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A newly created order (full payload)
    NewOrder { payload: Order },
    /// Status of one order changed (partial payload)
    OrderStatusUpdated { payload: StatusUpdatePayload },
    /// Full snapshot of active orders
    ActiveOrders { payload: Vec<Order> },
    /// Subscription handshake ack
    Subscribed {
        #[serde(default)]
        channel: Option<String>,
    },
    /// Application-level error; does not close the connection
    Error {
        #[serde(default)]
        message: String,
    },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wire tag of this message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::NewOrder { .. } => "new-order",
            ServerMessage::OrderStatusUpdated { .. } => "order-status-updated",
            ServerMessage::ActiveOrders { .. } => "active-orders",
            ServerMessage::Subscribed { .. } => "subscribed",
            ServerMessage::Error { .. } => "error",
        }
    }
}
