//! # Strata REST
//!
//! HTTP surface of a Strata node built on Axum: the `/health/*` endpoints,
//! the response cache gate applied to read requests, and the OpenAPI document.

pub mod controllers;
pub mod middleware;
pub mod openapi;
pub mod router;
pub mod state;

pub use middleware::{GateDecision, NoCache, ResponseCacheGate};
pub use router::*;
pub use state::*;
