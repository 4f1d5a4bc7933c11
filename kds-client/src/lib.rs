//! KDS Client - network collaborators of the kitchen display engine
//!
//! - [`HttpClient`]: REST calls to the order-storage service ([`OrderApi`])
//! - [`RealtimeChannel`]: push connection with subscription handshake and reconnection

pub mod config;
pub mod error;
pub mod http;
pub mod realtime;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use http::{HttpClient, OrderApi};
pub use realtime::{ChannelConfig, ChannelError, ChannelEvent, ConnectionState, RealtimeChannel};
