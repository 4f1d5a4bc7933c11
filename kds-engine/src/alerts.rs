//! Alert Scheduler - 提示音/闪屏调度
//!
//! Fire-and-forget cues for lifecycle events.
//!
//! ```text
//! engine ──try_send──► mpsc ──► worker ──► AlertSink::play
//!                                 │
//!                                 └── reads AlertSettings (watch) per alert
//! ```
//!
//! A full queue drops the alert; sink failures are logged and swallowed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::order::LifecycleEvent;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// 提示类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    NewOrder,
    StatusUpdated,
}

/// Audio/visual cue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub sound: String,
    pub flash: bool,
}

impl Cue {
    pub fn new(sound: impl Into<String>, flash: bool) -> Self {
        Self {
            sound: sound.into(),
            flash,
        }
    }
}

/// Cue lookup by alert kind
#[derive(Debug, Clone)]
pub struct CueTable {
    cues: HashMap<AlertKind, Cue>,
}

impl Default for CueTable {
    fn default() -> Self {
        Self::empty()
            .with_cue(AlertKind::NewOrder, Cue::new("new-order.wav", true))
            .with_cue(AlertKind::StatusUpdated, Cue::new("status-change.wav", false))
    }
}

impl CueTable {
    pub fn empty() -> Self {
        Self {
            cues: HashMap::new(),
        }
    }

    pub fn with_cue(mut self, kind: AlertKind, cue: Cue) -> Self {
        self.cues.insert(kind, cue);
        self
    }

    pub fn get(&self, kind: AlertKind) -> Option<&Cue> {
        self.cues.get(&kind)
    }
}

/// 外部配置的提示设置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub enabled: bool,
    /// 0.0 ..= 1.0
    pub volume: f32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.8,
        }
    }
}

/// One resolved alert handed to the sink
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub order_id: Option<String>,
    pub cue: Cue,
    pub volume: f32,
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Output device for alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn play(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Default sink: writes each alert to the log
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn play(&self, alert: &Alert) -> Result<(), AlertError> {
        tracing::info!(
            kind = ?alert.kind,
            order_id = alert.order_id.as_deref().unwrap_or(""),
            sound = %alert.cue.sound,
            flash = alert.cue.flash,
            volume = alert.volume,
            "Alert"
        );
        Ok(())
    }
}

#[derive(Debug)]
struct AlertRequest {
    kind: AlertKind,
    order_id: Option<String>,
}

/// Handle for submitting alerts; the worker exits once every handle is dropped
#[derive(Clone)]
pub struct AlertScheduler {
    tx: mpsc::Sender<AlertRequest>,
}

impl AlertScheduler {
    /// 创建调度器并启动播放 worker
    ///
    /// # 参数
    /// - `buffer`: 待播放队列容量，满则丢弃
    pub fn spawn(
        sink: Arc<dyn AlertSink>,
        settings: watch::Receiver<AlertSettings>,
        cues: CueTable,
        buffer: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(run_worker(rx, sink, settings, cues));
        (Self { tx }, handle)
    }

    /// Queue an alert without waiting
    pub fn notify(&self, kind: AlertKind, order_id: Option<&str>) {
        let request = AlertRequest {
            kind,
            order_id: order_id.map(str::to_string),
        };
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::warn!(kind = ?request.kind, "Alert queue full, alert dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Alert worker stopped, alert dropped");
            }
        }
    }

    /// Accepted status transition
    pub fn on_lifecycle_event(&self, event: &LifecycleEvent) {
        self.notify(AlertKind::StatusUpdated, Some(&event.order_id));
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AlertRequest>,
    sink: Arc<dyn AlertSink>,
    settings: watch::Receiver<AlertSettings>,
    cues: CueTable,
) {
    tracing::debug!("Alert worker started");

    while let Some(request) = rx.recv().await {
        let current = *settings.borrow();
        if !current.enabled {
            continue;
        }
        let Some(cue) = cues.get(request.kind) else {
            tracing::debug!(kind = ?request.kind, "No cue configured");
            continue;
        };

        let alert = Alert {
            kind: request.kind,
            order_id: request.order_id,
            cue: cue.clone(),
            volume: current.volume.clamp(0.0, 1.0),
        };
        if let Err(e) = sink.play(&alert).await {
            tracing::warn!(kind = ?alert.kind, "Alert playback failed: {e}");
        }
    }

    tracing::debug!("Alert worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::OrderStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        played: Mutex<Vec<Alert>>,
        fail: bool,
    }

    impl RecordingSink {
        fn played(&self) -> Vec<Alert> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn play(&self, alert: &Alert) -> Result<(), AlertError> {
            self.played.lock().unwrap().push(alert.clone());
            if self.fail {
                return Err(AlertError::Playback("device busy".into()));
            }
            Ok(())
        }
    }

    fn spawn(
        sink: Arc<RecordingSink>,
        settings: AlertSettings,
        buffer: usize,
    ) -> (AlertScheduler, JoinHandle<()>, watch::Sender<AlertSettings>) {
        let (settings_tx, settings_rx) = watch::channel(settings);
        let (scheduler, handle) = AlertScheduler::spawn(sink, settings_rx, CueTable::default(), buffer);
        (scheduler, handle, settings_tx)
    }

    #[tokio::test]
    async fn test_distinct_cues_per_kind() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, handle, _settings) = spawn(sink.clone(), AlertSettings::default(), 8);

        scheduler.notify(AlertKind::NewOrder, Some("1"));
        scheduler.on_lifecycle_event(&LifecycleEvent {
            order_id: "1".into(),
            from_status: OrderStatus::Pending,
            to_status: OrderStatus::Preparing,
        });
        drop(scheduler);
        handle.await.unwrap();

        let played = sink.played();
        assert_eq!(played.len(), 2);
        assert_eq!(played[0].kind, AlertKind::NewOrder);
        assert_eq!(played[1].kind, AlertKind::StatusUpdated);
        assert_ne!(played[0].cue, played[1].cue);
        assert_eq!(played[1].order_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_settings_read_at_dispatch() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, handle, settings) = spawn(sink.clone(), AlertSettings::default(), 8);

        scheduler.notify(AlertKind::NewOrder, None);
        // Worker has not run yet on the current-thread runtime
        settings.send_replace(AlertSettings {
            enabled: true,
            volume: 3.0,
        });
        drop(scheduler);
        handle.await.unwrap();

        assert_eq!(sink.played()[0].volume, 1.0);
    }

    #[tokio::test]
    async fn test_disabled_plays_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let settings = AlertSettings {
            enabled: false,
            volume: 0.5,
        };
        let (scheduler, handle, _settings) = spawn(sink.clone(), settings, 8);

        scheduler.notify(AlertKind::NewOrder, Some("1"));
        drop(scheduler);
        handle.await.unwrap();
        assert!(sink.played().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, handle, _settings) = spawn(sink.clone(), AlertSettings::default(), 1);

        for _ in 0..5 {
            scheduler.notify(AlertKind::StatusUpdated, None);
        }
        drop(scheduler);
        handle.await.unwrap();
        assert_eq!(sink.played().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (scheduler, handle, _settings) = spawn(sink.clone(), AlertSettings::default(), 8);

        scheduler.notify(AlertKind::NewOrder, None);
        scheduler.notify(AlertKind::NewOrder, None);
        drop(scheduler);
        handle.await.unwrap();
        assert_eq!(sink.played().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_cue_is_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let (_settings_tx, settings_rx) = watch::channel(AlertSettings::default());
        let cues = CueTable::empty().with_cue(AlertKind::NewOrder, Cue::new("bell.wav", true));
        let (scheduler, handle) = AlertScheduler::spawn(sink.clone(), settings_rx, cues, 8);

        scheduler.notify(AlertKind::StatusUpdated, None);
        scheduler.notify(AlertKind::NewOrder, None);
        drop(scheduler);
        handle.await.unwrap();

        let played = sink.played();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].cue.sound, "bell.wav");
    }
}
