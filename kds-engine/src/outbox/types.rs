//! Outbox types

use serde::{Deserialize, Serialize};
use shared::order::OrderStatus;
use std::time::Duration;

/// 队列条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Waiting for the next drain
    #[default]
    Pending,
    /// Retry cap reached or permanently rejected; needs an operator
    Failed,
}

/// A status mutation not yet acknowledged by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    /// Insertion sequence, storage key
    pub seq: u64,
    pub order_id: String,
    pub target_status: OrderStatus,
    /// Unix millis
    pub created_at: i64,
    pub attempts: u32,
    #[serde(default)]
    pub state: EntryState,
    /// Unix millis; earliest time the next send may happen
    #[serde(default)]
    pub next_attempt_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OutboxEntry {
    pub fn is_failed(&self) -> bool {
        self.state == EntryState::Failed
    }
}

/// Retry cap and backoff curve
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Failed sends before an entry is parked as failed
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl OutboxConfig {
    /// Delay before the next send after `attempts` failures
    ///
    /// `base * 2^(attempts-1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Sent and acknowledged by the server
    pub sent: usize,
    /// Removed without sending: the cache already holds the target state
    pub acknowledged_locally: usize,
    /// Send failed, left queued with backoff
    pub retried: usize,
    /// Moved to the failed state during this pass
    pub marked_failed: usize,
    /// Skipped: backing off, or behind a blocked entry of the same order
    pub deferred: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        *self == DrainReport::default()
    }
}

/// Counts for the "N queued" / "needs attention" indicators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queued: usize,
    pub needs_attention: usize,
}
