//! Scheduler metrics.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the scheduler.
pub mod names {
    /// Completed task runs, labelled by task and outcome.
    pub const TASK_RUNS_TOTAL: &str = "strata_scheduler_task_runs_total";
    /// Task run duration in seconds.
    pub const TASK_DURATION_SECONDS: &str = "strata_scheduler_task_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::TASK_RUNS_TOTAL,
        "Total number of scheduled task runs"
    );
    describe_histogram!(
        names::TASK_DURATION_SECONDS,
        "Scheduled task run duration in seconds"
    );
}

pub(crate) fn record_run(task: &str, outcome: &'static str, duration: Duration) {
    counter!(
        names::TASK_RUNS_TOTAL,
        "task" => task.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::TASK_DURATION_SECONDS, "task" => task.to_string()).record(duration.as_secs_f64());
}
