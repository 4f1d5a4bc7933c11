//! Order Cache - 看板订单缓存
//!
//! Owned projection of the order store. Mutated only through its entry
//! points: push application, snapshot application, optimistic updates and
//! acknowledgment reconciliation.
//!
//! Each entry keeps the last server-confirmed order plus an optional
//! optimistic status. Confirmed statuses only ever move forward along the
//! lifecycle graph; a server payload that would move an order backwards is
//! rejected as stale.
//!
//! On a cold start the entries are seeded from the last-known-good list.
//! Those entries are unverified: the first server payload for each of them
//! replaces the reloaded status even when it is behind it.

use kds_client::ConnectionState;
use shared::error::{AppError, ErrorCode};
use shared::message::ServerMessage;
use shared::order::lifecycle;
use shared::order::{LifecycleEvent, Order, OrderStatus};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Which refresh path is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Push events drive updates; polling suppressed
    Push,
    /// Fixed-interval polling while the channel is down
    Poll { interval: Duration },
}

impl RefreshMode {
    pub fn for_state(state: ConnectionState, poll_interval: Duration) -> Self {
        if state.is_connected() {
            RefreshMode::Push
        } else {
            RefreshMode::Poll {
                interval: poll_interval,
            }
        }
    }
}

/// Result of merging one server-side order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Advanced { from: OrderStatus, to: OrderStatus },
    Unchanged,
    /// Would regress the confirmed status; ignored
    Rejected,
}

/// Result of applying a full snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub inserted: Vec<String>,
    pub advanced: usize,
    pub removed: usize,
    pub rejected: usize,
}

/// What the caller must do after a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEffect {
    Merged {
        order_id: String,
        outcome: MergeOutcome,
    },
    Snapshot(SnapshotReport),
    /// Partial payload: cache invalidated, refetch needed
    Refetch,
    Ignored,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    confirmed: Order,
    optimistic: Option<OrderStatus>,
    /// Confirmed statuses in the order they were applied
    history: Vec<OrderStatus>,
    /// false while `confirmed` comes from the reloaded list
    verified: bool,
}

impl CacheEntry {
    fn new(order: Order) -> Self {
        Self {
            history: vec![order.status],
            confirmed: order,
            optimistic: None,
            verified: true,
        }
    }

    fn reloaded(order: Order) -> Self {
        Self {
            verified: false,
            ..Self::new(order)
        }
    }

    fn visible_status(&self) -> OrderStatus {
        self.optimistic.unwrap_or(self.confirmed.status)
    }

    fn visible(&self) -> Order {
        let mut order = self.confirmed.clone();
        order.status = self.visible_status();
        order
    }

    /// Drop the optimistic status once confirmed or no longer reachable
    fn settle_optimistic(&mut self) {
        if let Some(optimistic) = self.optimistic {
            let confirmed = self.confirmed.status;
            match confirmed.path_to(optimistic) {
                Some(path) if !path.is_empty() => {}
                Some(_) => self.optimistic = None,
                None => {
                    tracing::warn!(
                        order_id = %self.confirmed.id,
                        %confirmed,
                        %optimistic,
                        "Local update superseded by server state"
                    );
                    self.optimistic = None;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct OrderCache {
    entries: HashMap<String, CacheEntry>,
    has_server_data: bool,
    stale: bool,
    stale_rejections: u64,
}

impl OrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache with the last-known-good list
    ///
    /// Reloaded orders can be shown and transitioned right away. Orders
    /// already in the cache are left alone.
    pub fn load_fallback(&mut self, orders: Vec<Order>) {
        tracing::debug!(count = orders.len(), "Loaded last-known-good orders");
        for order in orders.into_iter().filter(Order::is_active) {
            self.entries
                .entry(order.id.clone())
                .or_insert_with(|| CacheEntry::reloaded(order));
        }
    }

    pub fn has_server_data(&self) -> bool {
        self.has_server_data
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Mark content as needing a refetch
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn stale_rejections(&self) -> u64 {
        self.stale_rejections
    }

    /// Active orders as the display should show them
    ///
    /// Sorted oldest first. Before any server data arrives this includes
    /// the reloaded last-known-good orders.
    pub fn get_active_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .entries
            .values()
            .map(CacheEntry::visible)
            .filter(Order::is_active)
            .collect();
        sort_orders(&mut orders);
        orders
    }

    /// Every cached order including terminal ones not yet evicted
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.entries.values().map(CacheEntry::visible).collect();
        sort_orders(&mut orders);
        orders
    }

    /// Confirmed active orders, for persisting as the next fallback
    pub fn confirmed_active(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .entries
            .values()
            .map(|e| e.confirmed.clone())
            .filter(Order::is_active)
            .collect();
        sort_orders(&mut orders);
        orders
    }

    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.entries.get(order_id).map(CacheEntry::visible)
    }

    pub fn visible_status(&self, order_id: &str) -> Option<OrderStatus> {
        self.entries.get(order_id).map(CacheEntry::visible_status)
    }

    pub fn confirmed_status(&self, order_id: &str) -> Option<OrderStatus> {
        self.entries.get(order_id).map(|e| e.confirmed.status)
    }

    /// Confirmed statuses applied so far for one order
    pub fn history(&self, order_id: &str) -> Option<&[OrderStatus]> {
        self.entries.get(order_id).map(|e| e.history.as_slice())
    }

    /// Single dispatch point for inbound push messages
    pub fn apply_push(&mut self, msg: &ServerMessage) -> PushEffect {
        match msg {
            ServerMessage::NewOrder { payload } => {
                let order_id = payload.id.clone();
                let outcome = self.merge(payload.clone());
                PushEffect::Merged { order_id, outcome }
            }
            ServerMessage::OrderStatusUpdated { payload } => {
                tracing::debug!(order_id = %payload.order_id, status = %payload.status, "Status update pushed, refetching");
                self.invalidate();
                PushEffect::Refetch
            }
            ServerMessage::ActiveOrders { payload } => {
                PushEffect::Snapshot(self.apply_snapshot(payload.clone()))
            }
            ServerMessage::Subscribed { .. } | ServerMessage::Error { .. } => PushEffect::Ignored,
        }
    }

    /// Replace the active set with a full listing
    ///
    /// Orders absent from the listing leave the cache. Applying the same
    /// listing twice leaves the visible content unchanged.
    pub fn apply_snapshot(&mut self, orders: Vec<Order>) -> SnapshotReport {
        let mut report = SnapshotReport::default();
        let ids: HashSet<String> = orders.iter().map(|o| o.id.clone()).collect();

        let before = self.entries.len();
        self.entries.retain(|id, _| ids.contains(id));
        report.removed = before - self.entries.len();

        for order in orders {
            let order_id = order.id.clone();
            match self.merge(order) {
                MergeOutcome::Inserted => report.inserted.push(order_id),
                MergeOutcome::Advanced { .. } => report.advanced += 1,
                MergeOutcome::Rejected => report.rejected += 1,
                MergeOutcome::Unchanged => {}
            }
        }

        self.has_server_data = true;
        self.stale = false;
        report
    }

    /// Merge one authoritative order (push payload or mutation ack)
    pub fn merge(&mut self, order: Order) -> MergeOutcome {
        let Some(entry) = self.entries.get_mut(&order.id) else {
            self.entries.insert(order.id.clone(), CacheEntry::new(order));
            return MergeOutcome::Inserted;
        };

        let from = entry.confirmed.status;
        let to = order.status;
        let path = match from.path_to(to) {
            Some(path) => path,
            None if !entry.verified => {
                tracing::debug!(order_id = %order.id, %from, %to, "Reloaded status replaced by server");
                entry.history.clear();
                vec![to]
            }
            None => {
                self.stale_rejections += 1;
                tracing::warn!(
                    order_id = %order.id,
                    %from,
                    %to,
                    code = ErrorCode::StaleData.code(),
                    "Rejected stale order data"
                );
                return MergeOutcome::Rejected;
            }
        };

        entry.verified = true;
        entry.history.extend(path.iter().copied());
        entry.confirmed = order;
        entry.settle_optimistic();

        if from == to {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Advanced { from, to }
        }
    }

    /// Apply a locally requested transition ahead of the server
    pub fn apply_optimistic(
        &mut self,
        order_id: &str,
        to: OrderStatus,
    ) -> Result<LifecycleEvent, AppError> {
        let entry = self
            .entries
            .get_mut(order_id)
            .ok_or_else(|| AppError::order_not_found(order_id))?;

        let event = lifecycle::transition(order_id, entry.visible_status(), to)?;
        entry.optimistic = Some(to);
        entry.settle_optimistic();
        Ok(event)
    }

    /// Show the confirmed status again
    pub fn revert_optimistic(&mut self, order_id: &str) {
        if let Some(entry) = self.entries.get_mut(order_id) {
            entry.optimistic = None;
        }
    }

    /// Re-apply a queued mutation after a reload, if still reachable
    pub fn overlay_pending(&mut self, order_id: &str, target: OrderStatus) {
        if let Some(entry) = self.entries.get_mut(order_id)
            && entry
                .visible_status()
                .path_to(target)
                .is_some_and(|path| !path.is_empty())
        {
            entry.optimistic = Some(target);
            entry.settle_optimistic();
        }
    }
}

fn sort_orders(orders: &mut [Order]) {
    orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
