//! # Strata Resilience
//!
//! Resilience patterns for the remote store boundary.
//! Provides bounded retry with capped backoff and per-operation timeouts.

pub mod retry;
pub mod timeout;

pub use retry::*;
pub use timeout::*;
