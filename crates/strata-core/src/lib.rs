//! # Strata Core
//!
//! Core types shared by every Strata crate: the unified error type,
//! the request principal contract consumed from the authentication layer,
//! and process-wide logging initialization.

pub mod caller;
pub mod error;
pub mod telemetry;

pub use caller::*;
pub use error::*;
pub use telemetry::*;
