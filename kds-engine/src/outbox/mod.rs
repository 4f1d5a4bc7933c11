//! Offline Outbox - 离线状态变更队列
//!
//! Durable queue of status mutations that could not be sent immediately.
//!
//! ```text
//! enqueue ──► [pending] ──drain ok──► removed (cache reconciled)
//!                │  ▲
//!          fail  │  │ retry_failed
//!                ▼  │
//!            attempts++ ──cap reached / rejected──► [failed] ──discard──► removed
//! ```
//!
//! Entries of the same order drain strictly in insertion order; a failed or
//! backing-off head blocks the rest of that order's entries.

mod storage;
mod types;

pub use storage::{OutboxStorage, OutboxStorageError, OutboxStorageResult};
pub use types::{DrainReport, EntryState, OutboxConfig, OutboxEntry, QueueStatus};

use crate::cache::OrderCache;
use kds_client::OrderApi;
use shared::error::ErrorCode;
use shared::order::OrderStatus;
use shared::util::now_millis;
use std::collections::HashSet;
use std::path::Path;

pub struct OfflineOutbox {
    storage: OutboxStorage,
    config: OutboxConfig,
}

impl OfflineOutbox {
    pub fn new(storage: OutboxStorage, config: OutboxConfig) -> Self {
        Self { storage, config }
    }

    /// Open or create `path`
    pub fn open(path: impl AsRef<Path>, config: OutboxConfig) -> OutboxStorageResult<Self> {
        Ok(Self::new(OutboxStorage::open(path)?, config))
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Queue a mutation for later delivery
    pub fn enqueue(
        &self,
        order_id: &str,
        target_status: OrderStatus,
    ) -> OutboxStorageResult<OutboxEntry> {
        let entry = self.storage.append(OutboxEntry {
            id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            order_id: order_id.to_string(),
            target_status,
            created_at: now_millis(),
            attempts: 0,
            state: EntryState::Pending,
            next_attempt_at: 0,
            last_error: None,
        })?;

        tracing::info!(
            order_id,
            target = %target_status,
            entry_id = %entry.id,
            "Status update queued"
        );
        Ok(entry)
    }

    /// Entries still eligible for automatic drain
    pub fn get_queue_length(&self) -> OutboxStorageResult<usize> {
        Ok(self.queue_status()?.queued)
    }

    pub fn queue_status(&self) -> OutboxStorageResult<QueueStatus> {
        let entries = self.storage.list()?;
        let needs_attention = entries.iter().filter(|e| e.is_failed()).count();
        Ok(QueueStatus {
            queued: entries.len() - needs_attention,
            needs_attention,
        })
    }

    pub fn entries(&self) -> OutboxStorageResult<Vec<OutboxEntry>> {
        self.storage.list()
    }

    pub fn pending_entries(&self) -> OutboxStorageResult<Vec<OutboxEntry>> {
        Ok(self
            .storage
            .list()?
            .into_iter()
            .filter(|e| !e.is_failed())
            .collect())
    }

    pub fn failed_entries(&self) -> OutboxStorageResult<Vec<OutboxEntry>> {
        Ok(self
            .storage
            .list()?
            .into_iter()
            .filter(OutboxEntry::is_failed)
            .collect())
    }

    /// Whether any entry (pending or failed) exists for the order
    pub fn has_entries_for(&self, order_id: &str) -> OutboxStorageResult<bool> {
        Ok(self.storage.list()?.iter().any(|e| e.order_id == order_id))
    }

    /// Send every eligible entry once
    ///
    /// Acknowledged entries are removed and the returned order is merged
    /// into the cache. Storage errors abort the pass; send errors never do.
    pub async fn drain(
        &self,
        api: &dyn OrderApi,
        cache: &mut OrderCache,
    ) -> OutboxStorageResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for mut entry in self.storage.list()? {
            if blocked.contains(&entry.order_id) {
                report.deferred += 1;
                continue;
            }
            if entry.is_failed() {
                blocked.insert(entry.order_id.clone());
                continue;
            }
            if entry.next_attempt_at > now_millis() {
                blocked.insert(entry.order_id.clone());
                report.deferred += 1;
                continue;
            }

            // Idempotent application against what the server already confirmed
            if let Some(confirmed) = cache.confirmed_status(&entry.order_id) {
                if entry.target_status.path_to(confirmed).is_some() {
                    self.storage.remove(entry.seq)?;
                    report.acknowledged_locally += 1;
                    tracing::debug!(
                        order_id = %entry.order_id,
                        target = %entry.target_status,
                        "Queued update already applied on server"
                    );
                    continue;
                }
                if confirmed.path_to(entry.target_status).is_none() {
                    entry.state = EntryState::Failed;
                    entry.last_error = Some(format!(
                        "order is {confirmed}, {} no longer reachable",
                        entry.target_status
                    ));
                    self.storage.update(&entry)?;
                    self.log_failed(&entry);
                    blocked.insert(entry.order_id.clone());
                    report.marked_failed += 1;
                    continue;
                }
            }

            match api.update_status(&entry.order_id, entry.target_status).await {
                Ok(order) => {
                    self.storage.remove(entry.seq)?;
                    cache.merge(order);
                    report.sent += 1;
                    tracing::info!(
                        order_id = %entry.order_id,
                        target = %entry.target_status,
                        attempts = entry.attempts,
                        "Queued update acknowledged"
                    );
                }
                Err(e) => {
                    entry.attempts += 1;
                    entry.last_error = Some(e.to_string());
                    blocked.insert(entry.order_id.clone());

                    if !e.is_retryable() || entry.attempts >= self.config.max_attempts {
                        entry.state = EntryState::Failed;
                        self.storage.update(&entry)?;
                        self.log_failed(&entry);
                        report.marked_failed += 1;
                    } else {
                        let delay = self.config.backoff(entry.attempts);
                        entry.next_attempt_at = now_millis() + delay.as_millis() as i64;
                        self.storage.update(&entry)?;
                        tracing::warn!(
                            order_id = %entry.order_id,
                            target = %entry.target_status,
                            attempts = entry.attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            code = ErrorCode::SyncFailed.code(),
                            "Queued update send failed: {e}"
                        );
                        report.retried += 1;
                    }
                }
            }
        }

        if !report.is_empty() {
            tracing::debug!(?report, "Outbox drain pass finished");
        }
        Ok(report)
    }

    fn log_failed(&self, entry: &OutboxEntry) {
        tracing::error!(
            order_id = %entry.order_id,
            target = %entry.target_status,
            entry_id = %entry.id,
            attempts = entry.attempts,
            error = entry.last_error.as_deref().unwrap_or(""),
            code = ErrorCode::OutboxEntryFailed.code(),
            "Queued update needs attention"
        );
    }

    fn failed_entry(&self, id: &str) -> OutboxStorageResult<OutboxEntry> {
        let entry = self
            .storage
            .find(id)?
            .ok_or_else(|| OutboxStorageError::EntryNotFound(id.to_string()))?;
        if !entry.is_failed() {
            return Err(OutboxStorageError::NotFailed(id.to_string()));
        }
        Ok(entry)
    }

    /// Put a failed entry back into automatic drain with a fresh budget
    pub fn retry_failed(&self, id: &str) -> OutboxStorageResult<OutboxEntry> {
        let mut entry = self.failed_entry(id)?;
        entry.state = EntryState::Pending;
        entry.attempts = 0;
        entry.next_attempt_at = 0;
        self.storage.update(&entry)?;
        tracing::info!(order_id = %entry.order_id, entry_id = id, "Failed update re-queued");
        Ok(entry)
    }

    /// Operator acknowledgment: drop a failed entry
    pub fn discard_failed(&self, id: &str) -> OutboxStorageResult<OutboxEntry> {
        let entry = self.failed_entry(id)?;
        self.storage.remove(entry.seq)?;
        tracing::warn!(
            order_id = %entry.order_id,
            target = %entry.target_status,
            entry_id = id,
            "Failed update discarded by operator"
        );
        Ok(entry)
    }

    /// Drop every failed entry; returns how many were removed
    pub fn clear_failed(&self) -> OutboxStorageResult<usize> {
        let failed = self.failed_entries()?;
        for entry in &failed {
            self.storage.remove(entry.seq)?;
        }
        if !failed.is_empty() {
            tracing::warn!(count = failed.len(), "Failed updates cleared by operator");
        }
        Ok(failed.len())
    }

    // ========== Last-known-good snapshot ==========

    pub fn save_snapshot(&self, orders: &[shared::order::Order]) -> OutboxStorageResult<()> {
        self.storage.save_snapshot(orders)
    }

    pub fn load_snapshot(&self) -> OutboxStorageResult<Vec<shared::order::Order>> {
        self.storage.load_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kds_client::{ClientError, ClientResult};
    use shared::order::Order;
    use std::sync::Mutex;
    use std::time::Duration;
    use OrderStatus::*;

    /// Server stand-in: applies PATCHes to its own order map
    #[derive(Default)]
    struct FakeServer {
        orders: Mutex<Vec<Order>>,
        fail_with: Mutex<Option<fn() -> ClientError>>,
        calls: Mutex<Vec<(String, OrderStatus)>>,
    }

    impl FakeServer {
        fn with_orders(orders: Vec<Order>) -> Self {
            Self {
                orders: Mutex::new(orders),
                ..Default::default()
            }
        }

        fn fail(&self, f: Option<fn() -> ClientError>) {
            *self.fail_with.lock().unwrap() = f;
        }

        fn calls(&self) -> Vec<(String, OrderStatus)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderApi for FakeServer {
        async fn fetch_active_orders(&self) -> ClientResult<Vec<Order>> {
            Ok(self.orders.lock().unwrap().clone())
        }

        async fn update_status(&self, order_id: &str, status: OrderStatus) -> ClientResult<Order> {
            self.calls.lock().unwrap().push((order_id.to_string(), status));
            if let Some(f) = *self.fail_with.lock().unwrap() {
                return Err(f());
            }
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .iter_mut()
                .find(|o| o.id == order_id)
                .ok_or_else(|| ClientError::NotFound(order_id.to_string()))?;
            order.status = status;
            Ok(order.clone())
        }
    }

    fn unavailable() -> ClientError {
        ClientError::Server {
            status: 503,
            message: "unavailable".into(),
        }
    }

    fn conflict() -> ClientError {
        ClientError::Rejected {
            status: 409,
            message: "conflict".into(),
        }
    }

    fn expired_token() -> ClientError {
        ClientError::Unauthorized
    }

    fn outbox(max_attempts: u32) -> OfflineOutbox {
        OfflineOutbox::new(
            OutboxStorage::open_in_memory().unwrap(),
            OutboxConfig {
                max_attempts,
                base_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
        )
    }

    fn cache_with(orders: &[Order]) -> OrderCache {
        let mut cache = OrderCache::new();
        cache.apply_snapshot(orders.to_vec());
        cache
    }

    #[tokio::test]
    async fn test_drain_sends_and_reconciles() {
        let orders = vec![Order::new("102", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = outbox(5);

        cache.apply_optimistic("102", Preparing).unwrap();
        outbox.enqueue("102", Preparing).unwrap();
        assert_eq!(outbox.get_queue_length().unwrap(), 1);

        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(outbox.get_queue_length().unwrap(), 0);
        assert_eq!(cache.confirmed_status("102"), Some(Preparing));
    }

    #[tokio::test]
    async fn test_same_order_drains_fifo() {
        let orders = vec![Order::new("1", Pending), Order::new("2", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = outbox(5);

        outbox.enqueue("1", Preparing).unwrap();
        outbox.enqueue("2", Preparing).unwrap();
        outbox.enqueue("1", Ready).unwrap();

        outbox.drain(&server, &mut cache).await.unwrap();
        let calls = server.calls();
        let order_1: Vec<OrderStatus> = calls.iter().filter(|(id, _)| id == "1").map(|(_, s)| *s).collect();
        assert_eq!(order_1, vec![Preparing, Ready]);
        assert_eq!(cache.confirmed_status("1"), Some(Ready));
    }

    #[tokio::test]
    async fn test_failure_blocks_later_entries_of_same_order() {
        let orders = vec![Order::new("1", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = outbox(5);

        outbox.enqueue("1", Preparing).unwrap();
        outbox.enqueue("1", Ready).unwrap();

        server.fail(Some(unavailable));
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(server.calls().len(), 1);

        server.fail(None);
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.sent, 2);
        assert!(outbox.storage.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_backoff_defers_entry() {
        let orders = vec![Order::new("1", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = OfflineOutbox::new(
            OutboxStorage::open_in_memory().unwrap(),
            OutboxConfig {
                max_attempts: 5,
                base_backoff: Duration::from_secs(60),
                max_backoff: Duration::from_secs(60),
            },
        );

        outbox.enqueue("1", Preparing).unwrap();
        server.fail(Some(unavailable));
        outbox.drain(&server, &mut cache).await.unwrap();

        server.fail(None);
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(server.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cap_marks_failed() {
        let orders = vec![Order::new("1", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = outbox(3);

        outbox.enqueue("1", Preparing).unwrap();
        server.fail(Some(unavailable));
        for _ in 0..3 {
            outbox.drain(&server, &mut cache).await.unwrap();
        }

        let status = outbox.queue_status().unwrap();
        assert_eq!(status, QueueStatus { queued: 0, needs_attention: 1 });

        // Failed entries are excluded from automatic drain
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(server.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_rejection_fails_immediately() {
        let orders = vec![Order::new("1", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = outbox(5);

        outbox.enqueue("1", Preparing).unwrap();
        server.fail(Some(conflict));
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.marked_failed, 1);

        let failed = outbox.failed_entries().unwrap();
        assert_eq!(failed[0].attempts, 1);
        assert!(failed[0].last_error.as_deref().unwrap().contains("409"));
    }

    #[tokio::test]
    async fn test_expired_token_backs_off_instead_of_failing() {
        let orders = vec![Order::new("1", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = outbox(5);

        outbox.enqueue("1", Preparing).unwrap();
        server.fail(Some(expired_token));
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.marked_failed, 0);
        assert_eq!(outbox.queue_status().unwrap().queued, 1);

        // Token renewed
        server.fail(None);
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn test_already_applied_is_acknowledged_locally() {
        let server = FakeServer::default();
        let mut cache = cache_with(&[Order::new("1", Ready)]);
        let outbox = outbox(5);

        outbox.enqueue("1", Preparing).unwrap();
        outbox.enqueue("1", Ready).unwrap();
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.acknowledged_locally, 2);
        assert!(server.calls().is_empty());
        assert_eq!(outbox.get_queue_length().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_target_fails_without_sending() {
        let server = FakeServer::default();
        let mut cache = cache_with(&[Order::new("1", Cancelled)]);
        let outbox = outbox(5);

        outbox.enqueue("1", Preparing).unwrap();
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.marked_failed, 1);
        assert!(server.calls().is_empty());
        assert_eq!(outbox.queue_status().unwrap().needs_attention, 1);
    }

    #[tokio::test]
    async fn test_retry_and_discard_failed() {
        let orders = vec![Order::new("1", Pending), Order::new("2", Pending)];
        let server = FakeServer::with_orders(orders.clone());
        let mut cache = cache_with(&orders);
        let outbox = outbox(1);

        let first = outbox.enqueue("1", Preparing).unwrap();
        let second = outbox.enqueue("2", Preparing).unwrap();
        server.fail(Some(unavailable));
        outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(outbox.queue_status().unwrap().needs_attention, 2);

        assert!(matches!(
            outbox.retry_failed("nope"),
            Err(OutboxStorageError::EntryNotFound(_))
        ));

        let retried = outbox.retry_failed(&first.id).unwrap();
        assert_eq!(retried.attempts, 0);
        assert!(matches!(
            outbox.retry_failed(&first.id),
            Err(OutboxStorageError::NotFailed(_))
        ));

        server.fail(None);
        let report = outbox.drain(&server, &mut cache).await.unwrap();
        assert_eq!(report.sent, 1);

        outbox.discard_failed(&second.id).unwrap();
        assert_eq!(outbox.queue_status().unwrap(), QueueStatus::default());
    }

    #[tokio::test]
    async fn test_clear_failed() {
        let outbox = outbox(1);
        let server = FakeServer::default();
        let mut cache = OrderCache::new();

        outbox.enqueue("ghost", Preparing).unwrap();
        // Unknown to the cache and to the server: 404, not retryable
        outbox.drain(&server, &mut cache).await.unwrap();
        outbox.enqueue("ghost-2", Preparing).unwrap();
        outbox.drain(&server, &mut cache).await.unwrap();

        assert_eq!(outbox.clear_failed().unwrap(), 2);
        assert!(outbox.entries().unwrap().is_empty());
    }
}
