//! HTTP middleware.

mod logging;
mod response_cache;

pub use logging::logging_middleware;
pub use response_cache::{response_cache_middleware, GateDecision, NoCache, ResponseCacheGate};
