//! Configuration-owned models read by the engine

pub mod station;

pub use station::{Station, StationStats};
