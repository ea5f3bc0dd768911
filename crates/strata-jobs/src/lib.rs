//! # Strata Jobs
//!
//! In-process scheduler for the recurring background work of a Strata node:
//! the memory check, the dashboard sweep and tag index reconciliation.
//!
//! Each task is bound to a [`Trigger`] (fixed interval or cron expression),
//! runs on its own timer, survives its own failures and panics, and can be
//! cancelled independently.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_jobs::{Scheduler, Trigger};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new();
//! scheduler.schedule("memory-check", Trigger::every(Duration::from_secs(300)), || async {
//!     Ok(())
//! })?;
//! scheduler.start()?;
//! ```

pub mod error;
pub mod metrics;
pub mod scheduler;

pub use error::{TaskError, TaskResult};
pub use metrics::register_metrics;
pub use scheduler::{ScheduledTask, ScheduledTaskInfo, Scheduler, TaskStats, Trigger};
