//! # Strata Monitor
//!
//! Health monitoring for the store behind the Strata cache.
//!
//! - [`StoreHealthMonitor`] checks memory usage against a configured ceiling,
//!   classifies pressure and remediates by purging expired keys.
//! - [`HealthDashboard`] folds the memory check, the cache counters and the manual
//!   alert log into a single [`DashboardSnapshot`].
//! - [`AlertDispatcher`] fans alerts out to sinks such as [`AlertLog`] and
//!   [`SlackAlertSink`].

pub mod alerts;
pub mod dashboard;
pub mod memory;
pub mod store_health;

pub use alerts::{Alert, AlertDispatcher, AlertError, AlertLevel, AlertLog, AlertSink, SlackAlertSink};
pub use dashboard::{generate_alerts, generate_recommendations, overall_status, DashboardSnapshot, HealthDashboard};
pub use memory::{parse_memory_string, HealthStatus, MemoryPressure, MemoryStats};
pub use store_health::{KeyMemory, StoreHealth, StoreHealthMonitor};
