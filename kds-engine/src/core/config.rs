use crate::alerts::AlertSettings;
use crate::outbox::OutboxConfig;
use crate::session::SessionConfig;
use kds_client::{ChannelConfig, ClientConfig};
use shared::error::AppError;
use shared::models::Station;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 看板引擎配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | KDS_API_URL | http://localhost:3000 | 订单服务地址 |
/// | KDS_WS_URL | ws://localhost:3000/ws | 实时推送地址 |
/// | KDS_API_TOKEN | - | Bearer token (可选) |
/// | KDS_CHANNEL | kds-orders | 订阅频道 |
/// | KDS_DATA_DIR | ./kds-data | 本地数据目录 (outbox) |
/// | KDS_STATIONS_FILE | - | 工位定义 JSON 文件 (可选) |
/// | RECONNECT_DELAY_MS | 3000 | 断线重连延迟 |
/// | CONNECT_TIMEOUT_MS | 10000 | WebSocket 建连超时 |
/// | POLL_INTERVAL_MS | 5000 | 断线时轮询间隔 |
/// | DRAIN_INTERVAL_MS | 15000 | outbox 兜底重发间隔 |
/// | OUTBOX_MAX_ATTEMPTS | 5 | 最大重试次数 |
/// | OUTBOX_BASE_BACKOFF_MS | 2000 | 退避基数 |
/// | OUTBOX_MAX_BACKOFF_MS | 60000 | 退避上限 |
/// | REQUEST_TIMEOUT_SECS | 10 | HTTP 请求超时 |
/// | ALERTS_ENABLED | true | 是否启用提示音 |
/// | ALERT_VOLUME | 0.8 | 提示音音量 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志 |
/// | LOG_DIR | - | 日志文件目录 (可选) |
///
/// # 示例
///
/// ```ignore
/// KDS_API_URL=http://pos.local:3000 KDS_STATIONS_FILE=stations.json cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub api_token: Option<String>,
    /// 推送频道名
    pub channel: String,
    /// 本地数据目录，存放 outbox 数据库
    pub data_dir: PathBuf,
    pub stations_file: Option<PathBuf>,

    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub drain_interval_ms: u64,

    pub outbox_max_attempts: u32,
    pub outbox_base_backoff_ms: u64,
    pub outbox_max_backoff_ms: u64,
    /// HTTP 请求超时 (秒)
    pub request_timeout_secs: u64,

    pub alerts_enabled: bool,
    pub alert_volume: f32,

    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("KDS_API_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            ws_url: std::env::var("KDS_WS_URL").unwrap_or_else(|_| "ws://localhost:3000/ws".into()),
            api_token: env_opt("KDS_API_TOKEN"),
            channel: std::env::var("KDS_CHANNEL")
                .unwrap_or_else(|_| shared::message::DEFAULT_CHANNEL.into()),
            data_dir: env_opt("KDS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./kds-data")),
            stations_file: env_opt("KDS_STATIONS_FILE").map(PathBuf::from),

            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", 3000),
            connect_timeout_ms: env_or("CONNECT_TIMEOUT_MS", 10000),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", 5000),
            drain_interval_ms: env_or("DRAIN_INTERVAL_MS", 15000),

            outbox_max_attempts: env_or("OUTBOX_MAX_ATTEMPTS", 5),
            outbox_base_backoff_ms: env_or("OUTBOX_BASE_BACKOFF_MS", 2000),
            outbox_max_backoff_ms: env_or("OUTBOX_MAX_BACKOFF_MS", 60000),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 10),

            alerts_enabled: env_or("ALERTS_ENABLED", true),
            alert_volume: env_or("ALERT_VOLUME", 0.8),

            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_or("LOG_JSON", false),
            log_dir: env_opt("LOG_DIR"),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new()
            .with_channel(self.channel.clone())
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms.max(1)))
    }

    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(self.api_url.clone())
            .with_ws_url(self.ws_url.clone())
            .with_timeout(self.request_timeout_secs)
            .with_channel(self.channel_config());
        match &self.api_token {
            Some(token) => config.with_token(token.clone()),
            None => config,
        }
    }

    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig {
            max_attempts: self.outbox_max_attempts.max(1),
            base_backoff: Duration::from_millis(self.outbox_base_backoff_ms),
            max_backoff: Duration::from_millis(self.outbox_max_backoff_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            drain_interval: Duration::from_millis(self.drain_interval_ms.max(1)),
        }
    }

    pub fn alert_settings(&self) -> AlertSettings {
        AlertSettings {
            enabled: self.alerts_enabled,
            volume: self.alert_volume,
        }
    }

    /// outbox 数据库路径
    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join("outbox.redb")
    }

    /// 读取工位定义，未配置时返回空列表
    pub fn load_stations(&self) -> Result<Vec<Station>, AppError> {
        let Some(path) = &self.stations_file else {
            return Ok(Vec::new());
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read stations file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            AppError::config(format!("Invalid stations file {}: {e}", path.display()))
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::ErrorCode;

    #[test]
    fn test_sub_configs() {
        let mut config = Config::from_env();
        config.outbox_max_attempts = 0;
        config.outbox_base_backoff_ms = 100;
        config.api_token = Some("secret".into());
        config.connect_timeout_ms = 2500;

        assert_eq!(config.outbox_config().max_attempts, 1);
        assert_eq!(config.outbox_config().base_backoff, Duration::from_millis(100));
        assert_eq!(config.client_config().token.as_deref(), Some("secret"));
        assert_eq!(config.channel_config().connect_timeout, Duration::from_millis(2500));
        assert!(config.outbox_path().ends_with("outbox.redb"));
    }

    #[test]
    fn test_load_stations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.json");
        std::fs::write(
            &path,
            r#"[{"id": "grill", "name": "Grill", "categoryFilters": ["grill"]},
                {"id": "salad", "name": "Salad", "categoryFilters": ["salad"], "priority": 1}]"#,
        )
        .unwrap();

        let mut config = Config::from_env();
        config.stations_file = Some(path.clone());
        let stations = config.load_stations().unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[1].priority, 1);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(config.load_stations().unwrap_err().code, ErrorCode::ConfigError);

        config.stations_file = None;
        assert!(config.load_stations().unwrap().is_empty());
    }
}
