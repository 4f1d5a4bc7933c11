//! Station Router - 工位分配
//!
//! Maps each order to at most one preparation station by category overlap.
//!
//! ```text
//! order categories ∩ station.category_filters
//!        │
//!        ├── highest overlap wins
//!        ├── tie: fewest active orders on the station
//!        └── tie: lower priority, then definition order
//! ```
//!
//! Auto-assignment runs once per order id. Manual assignments are sticky.

use shared::error::{AppError, ErrorCode};
use shared::models::{Station, StationStats};
use shared::order::Order;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct StationRouter {
    stations: Vec<Station>,
    /// order_id -> station_id
    assignments: HashMap<String, String>,
    /// Orders already offered to auto-assignment
    seen: HashSet<String>,
}

impl StationRouter {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            stations,
            ..Default::default()
        }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn station(&self, station_id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == station_id)
    }

    /// Replace the station set
    ///
    /// Orders assigned to a removed station become unassigned and are
    /// offered to auto-assignment again on the next pass.
    pub fn set_stations(&mut self, stations: Vec<Station>) {
        let ids: HashSet<&str> = stations.iter().map(|s| s.id.as_str()).collect();
        let orphaned: Vec<String> = self
            .assignments
            .iter()
            .filter(|(_, station_id)| !ids.contains(station_id.as_str()))
            .map(|(order_id, _)| order_id.clone())
            .collect();

        for order_id in &orphaned {
            self.assignments.remove(order_id);
            self.seen.remove(order_id);
        }

        tracing::info!(
            stations = stations.len(),
            orphaned = orphaned.len(),
            "Station set replaced"
        );
        self.stations = stations;
    }

    pub fn assignment(&self, order_id: &str) -> Option<&str> {
        self.assignments.get(order_id).map(String::as_str)
    }

    /// Route a newly observed order
    ///
    /// `active` is the current active set, used for load balancing. An order
    /// seen before keeps whatever assignment it has.
    pub fn auto_assign(&mut self, order: &Order, active: &[Order]) -> Option<String> {
        if !self.seen.insert(order.id.clone()) {
            return self.assignments.get(&order.id).cloned();
        }

        let categories = order.categories();
        if categories.is_empty() {
            tracing::debug!(order_id = %order.id, "Order has no categories, left unassigned");
            return None;
        }

        let mut load: HashMap<&str, usize> = HashMap::new();
        for other in active.iter().filter(|o| o.is_active() && o.id != order.id) {
            if let Some(station_id) = self.assignments.get(&other.id) {
                *load.entry(station_id.as_str()).or_default() += 1;
            }
        }

        let best = self
            .stations
            .iter()
            .enumerate()
            .filter_map(|(index, station)| {
                let overlap = station
                    .category_filters
                    .iter()
                    .filter(|c| categories.contains(c.as_str()))
                    .count();
                (overlap > 0).then(|| {
                    let held = load.get(station.id.as_str()).copied().unwrap_or(0);
                    (station, (std::cmp::Reverse(overlap), held, station.priority, index))
                })
            })
            .min_by_key(|(_, rank)| *rank)
            .map(|(station, _)| station.id.clone());

        match &best {
            Some(station_id) => {
                tracing::debug!(order_id = %order.id, station_id = %station_id, "Order auto-assigned");
                self.assignments.insert(order.id.clone(), station_id.clone());
            }
            None => {
                tracing::debug!(order_id = %order.id, "No station accepts this order");
            }
        }
        best
    }

    /// Manual override; never replaced by auto-assignment
    pub fn assign(&mut self, order_id: &str, station_id: &str) -> Result<(), AppError> {
        if self.station(station_id).is_none() {
            return Err(AppError::with_message(
                ErrorCode::StationNotFound,
                format!("Station {station_id} not found"),
            ));
        }

        self.seen.insert(order_id.to_string());
        let previous = self
            .assignments
            .insert(order_id.to_string(), station_id.to_string());
        tracing::info!(order_id, station_id, ?previous, "Order manually assigned");
        Ok(())
    }

    pub fn get_station_orders(&self, station_id: &str, orders: &[Order]) -> Vec<Order> {
        orders
            .iter()
            .filter(|o| self.assignment(&o.id) == Some(station_id))
            .cloned()
            .collect()
    }

    pub fn get_unassigned_orders(&self, orders: &[Order]) -> Vec<Order> {
        orders
            .iter()
            .filter(|o| !self.assignments.contains_key(&o.id))
            .cloned()
            .collect()
    }

    pub fn get_station_stats(&self, station_id: &str, orders: &[Order]) -> StationStats {
        let mut stats = StationStats::default();
        for order in orders.iter().filter(|o| self.assignment(&o.id) == Some(station_id)) {
            stats.record(order.status);
        }
        stats
    }

    /// Forget orders that left the active set
    pub fn retain_active<'a>(&mut self, active_ids: impl IntoIterator<Item = &'a str>) {
        let active: HashSet<&str> = active_ids.into_iter().collect();
        self.assignments.retain(|id, _| active.contains(id.as_str()));
        self.seen.retain(|id| active.contains(id.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::{OrderItem, OrderStatus};

    fn item(category: &str) -> OrderItem {
        OrderItem::new(category, 1).with_category(category)
    }

    fn order(id: &str, categories: &[&str]) -> Order {
        categories
            .iter()
            .fold(Order::new(id, OrderStatus::Pending), |o, c| o.with_item(item(c)))
    }

    fn grill_and_salad() -> StationRouter {
        StationRouter::new(vec![
            Station::new("grill", "Grill").with_filter("grill"),
            Station::new("salad", "Salad").with_filter("salad"),
        ])
    }

    #[test]
    fn test_assigns_by_category() {
        let mut router = grill_and_salad();
        let burger = order("1", &["grill"]);

        assert_eq!(router.auto_assign(&burger, &[]), Some("grill".to_string()));
        assert_eq!(router.assignment("1"), Some("grill"));
    }

    #[test]
    fn test_highest_overlap_wins() {
        let mut router = StationRouter::new(vec![
            Station::new("a", "A").with_filter("grill"),
            Station::new("b", "B").with_filter("grill").with_filter("fries"),
        ]);
        let combo = order("1", &["grill", "fries", "grill"]);
        assert_eq!(router.auto_assign(&combo, &[]).as_deref(), Some("b"));
    }

    #[test]
    fn test_tie_goes_to_least_loaded() {
        let mut router = StationRouter::new(vec![
            Station::new("a", "A").with_filter("grill"),
            Station::new("b", "B").with_filter("grill"),
        ]);
        let existing = vec![order("1", &["grill"]), order("2", &["grill"])];
        router.assign("1", "a").unwrap();
        router.assign("2", "a").unwrap();

        let new = order("3", &["grill"]);
        assert_eq!(router.auto_assign(&new, &existing).as_deref(), Some("b"));
    }

    #[test]
    fn test_terminal_orders_do_not_count_as_load() {
        let mut router = StationRouter::new(vec![
            Station::new("a", "A").with_filter("grill"),
            Station::new("b", "B").with_filter("grill").with_priority(1),
        ]);
        let mut done = order("1", &["grill"]);
        done.status = OrderStatus::Completed;
        router.assign("1", "a").unwrap();

        let new = order("2", &["grill"]);
        assert_eq!(router.auto_assign(&new, &[done]).as_deref(), Some("a"));
    }

    #[test]
    fn test_priority_then_definition_order() {
        let mut router = StationRouter::new(vec![
            Station::new("a", "A").with_filter("grill").with_priority(5),
            Station::new("b", "B").with_filter("grill").with_priority(1),
            Station::new("c", "C").with_filter("grill").with_priority(1),
        ]);
        assert_eq!(router.auto_assign(&order("1", &["grill"]), &[]).as_deref(), Some("b"));
    }

    #[test]
    fn test_no_match_stays_unassigned() {
        let mut router = grill_and_salad();
        let drink = order("1", &["bar"]);
        let plain = Order::new("2", OrderStatus::Pending).with_item(OrderItem::new("Water", 1));

        assert_eq!(router.auto_assign(&drink, &[]), None);
        assert_eq!(router.auto_assign(&plain, &[]), None);

        let orders = vec![drink, plain];
        assert_eq!(router.get_unassigned_orders(&orders).len(), 2);
    }

    #[test]
    fn test_manual_override_is_sticky() {
        let mut router = grill_and_salad();
        let burger = order("1", &["grill"]);

        router.assign("1", "salad").unwrap();
        assert_eq!(router.auto_assign(&burger, &[]).as_deref(), Some("salad"));
        assert_eq!(router.assignment("1"), Some("salad"));
    }

    #[test]
    fn test_auto_assign_runs_once() {
        let mut router = grill_and_salad();
        let drink = order("1", &["bar"]);
        assert_eq!(router.auto_assign(&drink, &[]), None);

        router.set_stations(vec![Station::new("bar", "Bar").with_filter("bar")]);
        // Already seen: not retried
        assert_eq!(router.auto_assign(&drink, &[]), None);
    }

    #[test]
    fn test_assign_unknown_station() {
        let mut router = grill_and_salad();
        let err = router.assign("1", "pizza").unwrap_err();
        assert_eq!(err.code, ErrorCode::StationNotFound);
        assert_eq!(router.assignment("1"), None);
    }

    #[test]
    fn test_station_orders_round_trip() {
        let mut router = grill_and_salad();
        let orders = vec![
            order("1", &["grill"]),
            order("2", &["salad"]),
            order("3", &["salad", "grill"]),
            order("4", &["bar"]),
        ];
        for o in &orders {
            router.auto_assign(o, &orders);
        }

        let grill: Vec<String> = router.get_station_orders("grill", &orders).into_iter().map(|o| o.id).collect();
        let salad: Vec<String> = router.get_station_orders("salad", &orders).into_iter().map(|o| o.id).collect();
        let unassigned: Vec<String> = router.get_unassigned_orders(&orders).into_iter().map(|o| o.id).collect();

        // "3" ties on overlap; grill already holds one order, salad holds one, grill is defined first
        assert_eq!(grill, vec!["1", "3"]);
        assert_eq!(salad, vec!["2"]);
        assert_eq!(unassigned, vec!["4"]);
        for id in &unassigned {
            assert!(router.assignment(id).is_none());
        }
    }

    #[test]
    fn test_station_stats() {
        let mut router = grill_and_salad();
        let mut ready = order("2", &["grill"]);
        ready.status = OrderStatus::Ready;
        let orders = vec![order("1", &["grill"]), ready, order("3", &["salad"])];
        for o in &orders {
            router.auto_assign(o, &orders);
        }

        let stats = router.get_station_stats("grill", &orders);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.total(), 2);
    }

    #[test]
    fn test_set_stations_orphans_assignments() {
        let mut router = grill_and_salad();
        let salad = order("1", &["salad"]);
        router.auto_assign(&salad, &[]);

        router.set_stations(vec![
            Station::new("grill", "Grill").with_filter("grill"),
            Station::new("cold", "Cold").with_filter("salad"),
        ]);
        assert_eq!(router.assignment("1"), None);
        assert_eq!(router.auto_assign(&salad, &[]).as_deref(), Some("cold"));
    }

    #[test]
    fn test_retain_active() {
        let mut router = grill_and_salad();
        router.auto_assign(&order("1", &["grill"]), &[]);
        router.auto_assign(&order("2", &["grill"]), &[]);

        router.retain_active(["2"]);
        assert_eq!(router.assignment("1"), None);
        assert_eq!(router.assignment("2"), Some("grill"));
    }
}
