//! KDS Engine - 订单同步与工位路由
//!
//! Single-owner facade wiring the cache, outbox, router and alerts together.
//!
//! ```text
//! ChannelEvent ──► OrderCache ──► StationRouter
//!                      ▲   │
//! request_transition ──┘   └──► AlertScheduler
//!        │
//!        ├── connected ──► PATCH ──ok──► merge ack
//!        │                   └──err──┐
//!        └── offline ────────────────┴──► OfflineOutbox ──drain──► PATCH
//! ```
//!
//! Transport and sync failures stay inside the engine. Only invalid
//! transitions, unknown ids and local storage failures reach the caller.

use crate::alerts::{AlertKind, AlertScheduler};
use crate::cache::{MergeOutcome, OrderCache, PushEffect, RefreshMode, SnapshotReport};
use crate::outbox::{DrainReport, OfflineOutbox, OutboxEntry, OutboxStorageError, QueueStatus};
use crate::router::StationRouter;
use kds_client::{ChannelEvent, ConnectionState, OrderApi};
use shared::error::{AppError, ErrorCode};
use shared::message::ServerMessage;
use shared::models::{Station, StationStats};
use shared::order::lifecycle;
use shared::order::{InvalidTransitionError, LifecycleEvent, Order, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxStorageError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error("Session closed")]
    SessionClosed,
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidTransition(e) => e.into(),
            EngineError::OrderNotFound(id) => AppError::order_not_found(id),
            EngineError::Outbox(e) => e.into(),
            EngineError::App(e) => e,
            EngineError::SessionClosed => {
                AppError::with_message(ErrorCode::ConnectionClosed, "KDS session closed")
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// How an accepted transition left the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by the server
    Sent(MergeOutcome),
    /// Waiting in the outbox
    Queued { entry_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub event: LifecycleEvent,
    pub delivery: Delivery,
}

pub struct KdsEngine {
    api: Arc<dyn OrderApi>,
    cache: OrderCache,
    outbox: OfflineOutbox,
    router: StationRouter,
    alerts: AlertScheduler,
    connection: ConnectionState,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl KdsEngine {
    /// 创建引擎，并用上次保存的订单列表作为离线占位
    ///
    /// 队列中尚未发送的状态会立即叠加显示，重载的订单也会立即参与工位分配。
    pub fn new(
        api: Arc<dyn OrderApi>,
        outbox: OfflineOutbox,
        router: StationRouter,
        alerts: AlertScheduler,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let mut cache = OrderCache::new();
        match outbox.load_snapshot() {
            Ok(orders) => cache.load_fallback(orders),
            Err(e) => tracing::warn!("Failed to load last-known-good orders: {e}"),
        }

        let mut engine = Self {
            api,
            cache,
            outbox,
            router,
            alerts,
            connection: ConnectionState::Disconnected,
            poll_interval,
            shutdown,
        };
        engine.overlay_pending();
        engine.sync_routing();
        engine
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        RefreshMode::for_state(self.connection, self.poll_interval)
    }

    pub fn cache(&self) -> &OrderCache {
        &self.cache
    }

    // ========== Inbound ==========

    /// Apply one event from the realtime channel
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(state) => self.on_state_changed(state).await,
            ChannelEvent::Message(msg) => self.on_message(msg).await,
        }
    }

    async fn on_state_changed(&mut self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.connection, state);
        if previous == state {
            return;
        }
        tracing::info!(?previous, current = ?state, mode = ?self.refresh_mode(), "Connection state changed");

        if state.is_connected() {
            self.refresh().await;
            if let Err(e) = self.drain().await {
                tracing::error!("Outbox drain after reconnect failed: {e}");
            }
        }
    }

    async fn on_message(&mut self, msg: ServerMessage) {
        // A pushed status equal to what this display already shows is our own echo
        let echo = match &msg {
            ServerMessage::OrderStatusUpdated { payload } => {
                self.cache.visible_status(&payload.order_id) == Some(payload.status)
            }
            _ => false,
        };
        let had_server_data = self.cache.has_server_data();

        match self.cache.apply_push(&msg) {
            PushEffect::Merged { order_id, outcome } => {
                if outcome == MergeOutcome::Inserted {
                    self.alerts.notify(AlertKind::NewOrder, Some(&order_id));
                }
                self.sync_routing();
            }
            PushEffect::Snapshot(report) => self.after_snapshot(&report, had_server_data),
            PushEffect::Refetch => {
                if let ServerMessage::OrderStatusUpdated { payload } = &msg
                    && !echo
                {
                    self.alerts
                        .notify(AlertKind::StatusUpdated, Some(&payload.order_id));
                }
                self.refresh().await;
            }
            PushEffect::Ignored => {}
        }
    }

    /// Fetch the active set and replace the cache with it
    ///
    /// Returns `None` when the fetch failed or the session has been torn
    /// down while it was in flight.
    pub async fn refresh(&mut self) -> Option<SnapshotReport> {
        let orders = match self.api.fetch_active_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!(
                    code = ErrorCode::ConnectionLost.code(),
                    "Active orders fetch failed: {e}"
                );
                return None;
            }
        };

        if self.shutdown.is_cancelled() {
            tracing::debug!("Session torn down, fetch result discarded");
            return None;
        }

        let had_server_data = self.cache.has_server_data();
        let report = self.cache.apply_snapshot(orders);
        self.after_snapshot(&report, had_server_data);
        Some(report)
    }

    fn after_snapshot(&mut self, report: &SnapshotReport, alert_new: bool) {
        self.overlay_pending();
        if let Err(e) = self.outbox.save_snapshot(&self.cache.confirmed_active()) {
            tracing::warn!("Failed to persist last-known-good orders: {e}");
        }
        if alert_new {
            for order_id in &report.inserted {
                self.alerts.notify(AlertKind::NewOrder, Some(order_id));
            }
        }
        if report.rejected > 0 {
            tracing::warn!(rejected = report.rejected, "Snapshot contained stale orders");
        }
        self.sync_routing();
    }

    fn overlay_pending(&mut self) {
        match self.outbox.pending_entries() {
            Ok(entries) => {
                for entry in entries {
                    self.cache.overlay_pending(&entry.order_id, entry.target_status);
                }
            }
            Err(e) => tracing::warn!("Failed to read queued updates: {e}"),
        }
    }

    fn sync_routing(&mut self) {
        let active = self.cache.get_active_orders();
        self.router.retain_active(active.iter().map(|o| o.id.as_str()));
        for order in &active {
            self.router.auto_assign(order, &active);
        }
    }

    // ========== Mutations ==========

    /// Validate a transition, apply it locally, then send or queue it
    pub async fn request_transition(
        &mut self,
        order_id: &str,
        to: OrderStatus,
    ) -> EngineResult<TransitionOutcome> {
        let current = self
            .cache
            .visible_status(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        let event = lifecycle::transition(order_id, current, to)?;

        self.cache.apply_optimistic(order_id, to)?;
        self.alerts.on_lifecycle_event(&event);
        tracing::info!(order_id, from = %event.from_status, to = %event.to_status, "Status transition accepted");

        let delivery = self.deliver(order_id, to).await?;
        self.sync_routing();
        Ok(TransitionOutcome { event, delivery })
    }

    /// Move to the next status in the forward chain
    pub async fn advance(&mut self, order_id: &str) -> EngineResult<TransitionOutcome> {
        let current = self
            .cache
            .visible_status(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        let event = lifecycle::advance(order_id, current)?;
        self.request_transition(order_id, event.to_status).await
    }

    async fn deliver(&mut self, order_id: &str, to: OrderStatus) -> EngineResult<Delivery> {
        // Earlier queued updates for this order must go first
        if self.connection.is_connected() && !self.outbox.has_entries_for(order_id)? {
            match self.api.update_status(order_id, to).await {
                Ok(order) => return Ok(Delivery::Sent(self.cache.merge(order))),
                Err(e) => {
                    tracing::warn!(
                        order_id,
                        target = %to,
                        retryable = e.is_retryable(),
                        code = ErrorCode::SyncFailed.code(),
                        "Direct send failed, queueing: {e}"
                    );
                }
            }
        }

        let entry = self.outbox.enqueue(order_id, to)?;
        Ok(Delivery::Queued { entry_id: entry.id })
    }

    /// One outbox pass against the order API
    pub async fn drain(&mut self) -> EngineResult<DrainReport> {
        let report = self.outbox.drain(self.api.as_ref(), &mut self.cache).await?;
        if report.sent > 0 {
            self.sync_routing();
        }
        Ok(report)
    }

    // ========== Queries ==========

    pub fn active_orders(&self) -> Vec<Order> {
        self.cache.get_active_orders()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.cache.get(order_id)
    }

    pub fn stations(&self) -> &[Station] {
        self.router.stations()
    }

    pub fn assignment(&self, order_id: &str) -> Option<&str> {
        self.router.assignment(order_id)
    }

    pub fn station_orders(&self, station_id: &str) -> Vec<Order> {
        self.router
            .get_station_orders(station_id, &self.cache.get_active_orders())
    }

    pub fn unassigned_orders(&self) -> Vec<Order> {
        self.router
            .get_unassigned_orders(&self.cache.get_active_orders())
    }

    pub fn station_stats(&self, station_id: &str) -> StationStats {
        self.router
            .get_station_stats(station_id, &self.cache.get_active_orders())
    }

    pub fn queue_status(&self) -> EngineResult<QueueStatus> {
        Ok(self.outbox.queue_status()?)
    }

    pub fn failed_entries(&self) -> EngineResult<Vec<OutboxEntry>> {
        Ok(self.outbox.failed_entries()?)
    }

    // ========== Operator ==========

    pub fn assign(&mut self, order_id: &str, station_id: &str) -> EngineResult<()> {
        Ok(self.router.assign(order_id, station_id)?)
    }

    pub fn set_stations(&mut self, stations: Vec<Station>) {
        self.router.set_stations(stations);
        self.sync_routing();
    }

    /// Re-queue a failed entry and try it right away when online
    pub async fn retry_failed(&mut self, entry_id: &str) -> EngineResult<DrainReport> {
        let entry = self.outbox.retry_failed(entry_id)?;
        self.cache.overlay_pending(&entry.order_id, entry.target_status);
        if self.connection.is_connected() {
            return self.drain().await;
        }
        Ok(DrainReport::default())
    }

    /// Drop a failed entry and stop showing its status locally
    pub fn discard_failed(&mut self, entry_id: &str) -> EngineResult<OutboxEntry> {
        let entry = self.outbox.discard_failed(entry_id)?;
        self.reset_order_overlay(&entry.order_id);
        Ok(entry)
    }

    pub fn clear_failed(&mut self) -> EngineResult<usize> {
        let failed = self.outbox.failed_entries()?;
        let cleared = self.outbox.clear_failed()?;
        for entry in &failed {
            self.reset_order_overlay(&entry.order_id);
        }
        Ok(cleared)
    }

    fn reset_order_overlay(&mut self, order_id: &str) {
        self.cache.revert_optimistic(order_id);
        self.overlay_pending();
    }
}
