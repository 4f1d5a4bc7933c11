//! Kitchen Station Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::order::OrderStatus;

/// Preparation station entity
///
/// Created by configuration; the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub name: String,
    /// Display hint only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Category tags this station accepts
    #[serde(default)]
    pub category_filters: BTreeSet<String>,
    /// Tie-break order, lower wins
    #[serde(default)]
    pub priority: i32,
}

impl Station {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
            category_filters: BTreeSet::new(),
            priority: 0,
        }
    }

    pub fn with_filter(mut self, category: impl Into<String>) -> Self {
        self.category_filters.insert(category.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Per-status counts for one station's current order set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStats {
    pub pending: usize,
    pub preparing: usize,
    pub ready: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl StationStats {
    pub fn record(&mut self, status: OrderStatus) {
        match status {
            OrderStatus::Pending => self.pending += 1,
            OrderStatus::Preparing => self.preparing += 1,
            OrderStatus::Ready => self.ready += 1,
            OrderStatus::Completed => self.completed += 1,
            OrderStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.preparing + self.ready + self.completed + self.cancelled
    }

    /// Orders still being worked on
    pub fn active(&self) -> usize {
        self.pending + self.preparing + self.ready
    }
}
