// kds-client/src/realtime/mod.rs
// 实时推送通道 - 配置、连接状态和事件类型

mod channel;
mod reconnect;

pub use channel::RealtimeChannel;
pub use reconnect::{ReconnectAction, ReconnectState};

use shared::error::{AppError, ErrorCode};
use shared::message::{DEFAULT_CHANNEL, ServerMessage};
use std::time::Duration;
use thiserror::Error;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// 通道事件 (观察者通过 `RealtimeChannel::on_message` 订阅)
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// 连接状态变化
    StateChanged(ConnectionState),
    /// 服务端推送的业务消息 (`new-order` / `order-status-updated` / `active-orders`)
    Message(ServerMessage),
}

/// 通道错误
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ChannelError> for AppError {
    fn from(err: ChannelError) -> Self {
        let code = match &err {
            ChannelError::Closed => ErrorCode::ConnectionClosed,
            ChannelError::Connection(_) | ChannelError::WebSocket(_) => ErrorCode::ConnectionLost,
            ChannelError::Serialization(_) => ErrorCode::InternalError,
        };
        AppError::with_message(code, err.to_string())
    }
}

/// 实时通道配置
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// 默认订阅的频道
    pub channel: String,
    /// 断线后重连延迟 (固定, 不做指数退避)
    pub reconnect_delay: Duration,
    /// 单次建连 (TCP + WebSocket 握手) 超时
    pub connect_timeout: Duration,
    /// WebSocket 心跳间隔
    pub ping_interval: Duration,
    /// 事件广播缓冲区大小
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置订阅频道
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// 设置重连延迟
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// 设置建连超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 设置心跳间隔
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}
