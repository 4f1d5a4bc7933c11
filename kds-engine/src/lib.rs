//! KDS Engine - 厨房显示系统的订单同步与工位路由引擎
//!
//! # 架构概述
//!
//! - **订单缓存** (`cache`): 推送/轮询驱动的订单快照，乐观更新与服务端对账
//! - **离线队列** (`outbox`): redb 持久化的状态变更队列，重连后按订单 FIFO 重发
//! - **工位路由** (`router`): 按品类重叠度分配工位，负载均衡
//! - **提示调度** (`alerts`): 新订单/状态变更的提示音与闪屏
//! - **引擎** (`engine`): 发送或入队的主流程
//! - **会话** (`session`): 单消费者事件循环
//!
//! # 模块结构
//!
//! ```text
//! kds-engine/src/
//! ├── core/          # 配置
//! ├── utils/         # 日志
//! ├── cache.rs       # OrderCache, RefreshMode
//! ├── outbox/        # OfflineOutbox + redb 存储
//! ├── router.rs      # StationRouter
//! ├── alerts.rs      # AlertScheduler
//! ├── engine.rs      # KdsEngine
//! └── session.rs     # KdsSession, KdsHandle
//! ```

pub mod alerts;
pub mod cache;
pub mod core;
pub mod engine;
pub mod outbox;
pub mod router;
pub mod session;
pub mod utils;

// Re-export 公共类型
pub use alerts::{Alert, AlertError, AlertKind, AlertScheduler, AlertSettings, AlertSink, Cue, CueTable, LogSink};
pub use cache::{MergeOutcome, OrderCache, PushEffect, RefreshMode, SnapshotReport};
pub use core::Config;
pub use engine::{Delivery, EngineError, EngineResult, KdsEngine, TransitionOutcome};
pub use outbox::{DrainReport, OfflineOutbox, OutboxConfig, OutboxEntry, QueueStatus};
pub use router::StationRouter;
pub use session::{KdsHandle, KdsSession, SessionConfig};

// Re-export logger functions
pub use utils::logger::{cleanup_old_logs, init_logger_with_file};
