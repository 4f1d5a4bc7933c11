use kds_client::RealtimeChannel;
use kds_engine::{
    AlertScheduler, Config, CueTable, KdsEngine, KdsSession, LogSink, OfflineOutbox,
    StationRouter, cleanup_old_logs, init_logger_with_file,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const ALERT_BUFFER: usize = 64;
const LOG_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志)
    dotenv::dotenv().ok();
    let config = Config::from_env();
    init_logger_with_file(&config.log_level, config.log_json, config.log_dir.as_deref())?;

    tracing::info!(api = %config.api_url, ws = %config.ws_url, "KDS engine starting...");

    let shutdown = CancellationToken::new();
    if let Some(dir) = &config.log_dir {
        tokio::spawn(run_log_cleanup(PathBuf::from(dir), shutdown.clone()));
    }

    // 2. 本地状态: 工位定义 + outbox
    std::fs::create_dir_all(&config.data_dir)?;
    let stations = config.load_stations()?;
    tracing::info!(count = stations.len(), "Stations loaded");
    let outbox = OfflineOutbox::open(config.outbox_path(), config.outbox_config())?;

    // 3. 网络协作者
    let client_config = config.client_config();
    let api = Arc::new(client_config.build_http_client()?);
    let channel = RealtimeChannel::new(client_config.channel.clone());
    let events = channel.on_message();

    // 4. 引擎 + 会话
    let (_settings_tx, settings_rx) = watch::channel(config.alert_settings());
    let (alerts, alert_worker) =
        AlertScheduler::spawn(Arc::new(LogSink), settings_rx, CueTable::default(), ALERT_BUFFER);
    let session_config = config.session_config();
    let engine = KdsEngine::new(
        api,
        outbox,
        StationRouter::new(stations),
        alerts,
        session_config.poll_interval,
        shutdown.clone(),
    );
    let (session, _handle) = KdsSession::new(engine, events, shutdown.clone(), session_config);
    let session_task = tokio::spawn(session.run());

    channel.connect(client_config.ws_url.clone())?;

    // 5. 等待退出信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    channel.close().await;
    let engine = session_task.await?;

    let status = engine.queue_status()?;
    if status.queued > 0 || status.needs_attention > 0 {
        tracing::warn!(
            queued = status.queued,
            needs_attention = status.needs_attention,
            "Unsent status updates kept for next start"
        );
    }

    // Dropping the engine releases the last alert handle
    drop(engine);
    alert_worker.await?;

    tracing::info!("KDS engine stopped");
    Ok(())
}

async fn run_log_cleanup(log_dir: PathBuf, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(LOG_CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = cleanup_old_logs(&log_dir) {
                    tracing::warn!("Log cleanup failed: {e}");
                }
            }
            _ = shutdown.cancelled() => return,
        }
    }
}
