//! Order projection held by the kitchen display

use super::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// 菜品行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    /// 做法/备注 (e.g. "no onion")
    #[serde(default)]
    pub modifications: BTreeSet<String>,
    /// Category tag used for station routing (e.g. "grill")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl OrderItem {
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            name: name.into(),
            quantity,
            modifications: BTreeSet::new(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_modification(mut self, modification: impl Into<String>) -> Self {
        self.modifications.insert(modification.into());
        self
    }
}

/// Order as owned by the order-storage service
///
/// The engine only holds a read/write-through projection of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub total: f64,
}

impl Order {
    pub fn new(id: impl Into<String>, status: OrderStatus) -> Self {
        Self {
            id: id.into(),
            table_number: None,
            customer_name: None,
            items: Vec::new(),
            status,
            created_at: Utc::now(),
            total: 0.0,
        }
    }

    pub fn with_table(mut self, table_number: u32) -> Self {
        self.table_number = Some(table_number);
        self
    }

    pub fn with_item(mut self, item: OrderItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether the order still belongs on the kitchen display
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Distinct item categories of this order
    pub fn categories(&self) -> HashSet<&str> {
        self.items
            .iter()
            .filter_map(|item| item.category.as_deref())
            .collect()
    }
}
