//! Recurring task scheduler.
//!
//! Each registered task runs on its own timer. A run that fails or panics is
//! logged and counted; the next tick runs again. Tasks can be cancelled one
//! at a time or all together on shutdown.

use crate::error::{TaskError, TaskResult};
use crate::metrics::record_run;
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// When a task fires.
#[derive(Clone)]
pub enum Trigger {
    /// Fixed period; the first run happens one period after start.
    Every(Duration),
    /// Cron expression (seconds field included).
    Cron(Box<Schedule>),
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(period) => write!(f, "every {:?}", period),
            Self::Cron(schedule) => write!(f, "cron {}", schedule),
        }
    }
}

impl Trigger {
    pub fn every(period: Duration) -> Self {
        Self::Every(period)
    }

    pub fn cron(expr: &str) -> TaskResult<Self> {
        let schedule = Schedule::from_str(expr)
            .map_err(|e| TaskError::Configuration(format!("Invalid cron expression '{}': {}", expr, e)))?;
        Ok(Self::Cron(Box::new(schedule)))
    }

    /// A cron expression wins over the interval when both are configured.
    pub fn from_config(interval_secs: u64, cron: Option<&str>) -> TaskResult<Self> {
        match cron.filter(|c| !c.trim().is_empty()) {
            Some(expr) => Self::cron(expr),
            None if interval_secs == 0 => Err(TaskError::Configuration(
                "interval must be non-zero".to_string(),
            )),
            None => Ok(Self::every(Duration::from_secs(interval_secs))),
        }
    }

    /// Next fire time after `from`, if there is one.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(period) => chrono::Duration::from_std(*period).ok().map(|d| from + d),
            Self::Cron(schedule) => schedule.after(&from).next(),
        }
    }

    fn clock(&self) -> Clock {
        match self {
            Self::Every(period) => {
                let period = (*period).max(Duration::from_millis(1));
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Clock::Interval(ticker)
            }
            Self::Cron(schedule) => Clock::Cron(schedule.clone()),
        }
    }
}

enum Clock {
    Interval(Interval),
    Cron(Box<Schedule>),
}

impl Clock {
    /// Waits for the next fire time. Returns `false` when the schedule has
    /// no upcoming occurrence.
    async fn tick(&mut self) -> bool {
        match self {
            Self::Interval(ticker) => {
                ticker.tick().await;
                true
            }
            Self::Cron(schedule) => {
                let now = Utc::now();
                let Some(next) = schedule.after(&now).next() else {
                    return false;
                };
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, TaskResult<()>> + Send + Sync>;

/// A named unit of recurring work.
#[derive(Clone)]
pub struct ScheduledTask {
    pub name: String,
    pub trigger: Trigger,
    task: TaskFn,
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .finish()
    }
}

impl ScheduledTask {
    pub fn new<F, Fut>(name: impl Into<String>, trigger: Trigger, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        let task: TaskFn = Arc::new(move || -> BoxFuture<'static, TaskResult<()>> { Box::pin(task()) });
        Self {
            name: name.into(),
            trigger,
            task,
        }
    }
}

/// Run counters for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub runs: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Information about a registered task.
#[derive(Debug, Clone)]
pub struct ScheduledTaskInfo {
    pub name: String,
    pub trigger: String,
    pub running: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub stats: TaskStats,
}

struct Registration {
    task: ScheduledTask,
    stats: Arc<RwLock<TaskStats>>,
    handle: Option<JoinHandle<()>>,
}

/// In-process scheduler for recurring tasks.
pub struct Scheduler {
    tasks: Mutex<HashMap<String, Registration>>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Mutex::new(HashMap::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Registers a task. If the scheduler is already running it starts now.
    pub fn register(&self, task: ScheduledTask) -> TaskResult<()> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&task.name) {
            return Err(TaskError::Configuration(format!(
                "Task already registered: {}",
                task.name
            )));
        }

        let name = task.name.clone();
        let mut registration = Registration {
            task,
            stats: Arc::new(RwLock::new(TaskStats::default())),
            handle: None,
        };

        if self.running.load(Ordering::SeqCst) {
            registration.handle = Some(self.spawn(&registration));
        }

        info!(task = %name, trigger = ?registration.task.trigger, "Registered scheduled task");
        tasks.insert(name, registration);
        Ok(())
    }

    /// Convenience wrapper around [`Scheduler::register`].
    pub fn schedule<F, Fut>(&self, name: impl Into<String>, trigger: Trigger, task: F) -> TaskResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        self.register(ScheduledTask::new(name, trigger, task))
    }

    /// Starts every registered task.
    pub fn start(&self) -> TaskResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TaskError::Configuration("Scheduler already running".to_string()));
        }

        let mut tasks = self.tasks.lock();
        for registration in tasks.values_mut() {
            if registration.handle.is_none() {
                registration.handle = Some(self.spawn(registration));
            }
        }

        info!(tasks = tasks.len(), "Scheduler started");
        Ok(())
    }

    /// Stops and removes one task. Other tasks keep running.
    pub fn cancel(&self, name: &str) -> TaskResult<()> {
        let registration = self
            .tasks
            .lock()
            .remove(name)
            .ok_or_else(|| TaskError::NotFound(name.to_string()))?;

        if let Some(handle) = registration.handle {
            handle.abort();
        }
        info!(task = %name, "Cancelled scheduled task");
        Ok(())
    }

    /// Signals every task loop to exit and aborts in-flight runs.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping scheduler...");
        let _ = self.shutdown_tx.send(());
        for registration in self.tasks.lock().values_mut() {
            if let Some(handle) = registration.handle.take() {
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self, name: &str) -> Option<TaskStats> {
        self.tasks.lock().get(name).map(|r| r.stats.read().clone())
    }

    pub fn list_tasks(&self) -> Vec<ScheduledTaskInfo> {
        let now = Utc::now();
        self.tasks
            .lock()
            .values()
            .map(|r| ScheduledTaskInfo {
                name: r.task.name.clone(),
                trigger: format!("{:?}", r.task.trigger),
                running: r.handle.as_ref().is_some_and(|h| !h.is_finished()),
                next_run: r.task.trigger.next_after(now),
                stats: r.stats.read().clone(),
            })
            .collect()
    }

    /// Runs a task once, outside its schedule.
    pub async fn trigger(&self, name: &str) -> TaskResult<()> {
        let (task, stats) = {
            let tasks = self.tasks.lock();
            let registration = tasks
                .get(name)
                .ok_or_else(|| TaskError::NotFound(name.to_string()))?;
            (registration.task.clone(), registration.stats.clone())
        };

        run_once(&task, &stats).await
    }

    fn spawn(&self, registration: &Registration) -> JoinHandle<()> {
        let task = registration.task.clone();
        let stats = registration.stats.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut clock = task.trigger.clock();
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(task = %task.name, "Task loop received shutdown signal");
                        break;
                    }
                    fired = clock.tick() => {
                        if !fired {
                            warn!(task = %task.name, "Schedule has no upcoming run; task loop exiting");
                            break;
                        }
                        // Failures are already logged and counted.
                        let _ = run_once(&task, &stats).await;
                    }
                }
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for registration in self.tasks.get_mut().values_mut() {
            if let Some(handle) = registration.handle.take() {
                handle.abort();
            }
        }
    }
}

/// Aborts the wrapped run when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs the task body on its own tokio task so a panic stays contained.
///
/// The run is tied to the caller: dropping this future, as aborting a task
/// loop does, aborts the run too.
async fn run_once(task: &ScheduledTask, stats: &RwLock<TaskStats>) -> TaskResult<()> {
    let started = Instant::now();
    let mut run = AbortOnDrop(tokio::spawn((task.task)()));
    let outcome = match (&mut run.0).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => Err(TaskError::Panicked(join_err.to_string())),
        Err(join_err) => Err(TaskError::ExecutionFailed(join_err.to_string())),
    };
    let elapsed = started.elapsed();

    let mut stats = stats.write();
    stats.runs += 1;
    stats.last_run = Some(Utc::now());

    match &outcome {
        Ok(()) => {
            debug!(task = %task.name, duration_ms = elapsed.as_millis() as u64, "Scheduled task completed");
            stats.last_error = None;
            record_run(&task.name, "success", elapsed);
        }
        Err(e) => {
            error!(task = %task.name, error = %e, "Scheduled task failed");
            stats.failures += 1;
            stats.last_error = Some(e.to_string());
            record_run(&task.name, "failure", elapsed);
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_task(counter: Arc<AtomicU32>, fail: bool) -> impl Fn() -> BoxFuture<'static, TaskResult<()>> {
        move || -> BoxFuture<'static, TaskResult<()>> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(TaskError::failed("store unreachable"))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[test]
    fn test_trigger_from_config() {
        assert!(matches!(
            Trigger::from_config(300, None).unwrap(),
            Trigger::Every(d) if d == Duration::from_secs(300)
        ));
        assert!(matches!(
            Trigger::from_config(300, Some("0 */5 * * * *")).unwrap(),
            Trigger::Cron(_)
        ));
        assert!(Trigger::from_config(0, None).is_err());
        assert!(Trigger::cron("not a cron").is_err());
    }

    #[test]
    fn test_cron_next_run() {
        let trigger = Trigger::cron("0 * * * * *").unwrap();
        let now = Utc::now();
        let next = trigger.next_after(now).unwrap();
        assert!(next > now);
        assert!(next - now <= chrono::Duration::seconds(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_task_runs_each_period() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("sweep", Trigger::every(Duration::from_secs(60)), counting_task(counter.clone(), false))
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(151)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.stats("sweep").unwrap().runs, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_keeps_running() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("flaky", Trigger::every(Duration::from_secs(10)), counting_task(counter.clone(), true))
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;

        let stats = scheduler.stats("flaky").unwrap();
        assert_eq!(stats.runs, 3);
        assert_eq!(stats.failures, 3);
        assert!(stats.last_error.unwrap().contains("store unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_is_contained() {
        let scheduler = Scheduler::new();
        scheduler
            .schedule("boom", Trigger::every(Duration::from_secs(10)), || async {
                if Utc::now().timestamp() > 0 {
                    panic!("bad state");
                }
                Ok(())
            })
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;

        let stats = scheduler.stats("boom").unwrap();
        assert_eq!(stats.failures, 2);
        assert!(scheduler.list_tasks()[0].running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_only_that_task() {
        let scheduler = Scheduler::new();
        let kept = Arc::new(AtomicU32::new(0));
        let cancelled = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("kept", Trigger::every(Duration::from_secs(10)), counting_task(kept.clone(), false))
            .unwrap();
        scheduler
            .schedule("cancelled", Trigger::every(Duration::from_secs(10)), counting_task(cancelled.clone(), false))
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.cancel("cancelled").unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(kept.load(Ordering::SeqCst), 3);
        assert!(matches!(scheduler.cancel("cancelled"), Err(TaskError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_all_tasks() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("sweep", Trigger::every(Duration::from_secs(10)), counting_task(counter.clone(), false))
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_in_flight_run() {
        let scheduler = Scheduler::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        scheduler
            .schedule("slow-sweep", Trigger::every(Duration::from_secs(1)), move || {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_run() {
        let scheduler = Scheduler::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        scheduler
            .schedule("slow-sweep", Trigger::every(Duration::from_secs(1)), move || {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.cancel("slow-sweep").unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("a", Trigger::every(Duration::from_secs(1)), counting_task(counter.clone(), false))
            .unwrap();
        assert!(scheduler
            .schedule("a", Trigger::every(Duration::from_secs(1)), counting_task(counter, false))
            .is_err());
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule("sweep", Trigger::every(Duration::from_secs(600)), counting_task(counter.clone(), false))
            .unwrap();

        scheduler.trigger("sweep").await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats("sweep").unwrap().runs, 1);
        assert!(scheduler.trigger("missing").await.is_err());
    }
}
