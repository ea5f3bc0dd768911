//! # Strata Server Library
//!
//! Wiring for a Strata node: store selection, the cache engine, store
//! monitoring, the dashboard, background tasks and the HTTP router.

pub mod app;
pub mod startup;
