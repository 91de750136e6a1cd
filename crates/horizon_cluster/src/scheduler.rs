//! # Scheduling
//!
//! Two execution contexts exist in a node:
//!
//! - the **primary context**, a single task draining a queue of closures one
//!   at a time. Every host-engine mutation runs here.
//! - the tokio worker pool, where store I/O and subscription delivery run.
//!
//! Work hops onto the primary context through [`Scheduler::call_sync`].
//! Deferred and periodic work is described by a [`TaskDescriptor`] in host
//! ticks and started with [`Scheduler::run_task`].

use crate::error::ClusterError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Default host time quantum.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a scheduled task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskMode {
    /// On the primary context
    Sync,
    /// Off the primary context
    Async,
}

/// Shape of a scheduled task: mode, initial delay and optional period, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub mode: TaskMode,
    pub delay_ticks: u64,
    pub period_ticks: Option<u64>,
}

impl TaskDescriptor {
    pub fn sync_once(delay_ticks: u64) -> Self {
        Self {
            mode: TaskMode::Sync,
            delay_ticks,
            period_ticks: None,
        }
    }

    pub fn sync_repeating(delay_ticks: u64, period_ticks: u64) -> Self {
        Self {
            mode: TaskMode::Sync,
            delay_ticks,
            period_ticks: Some(period_ticks),
        }
    }

    pub fn async_once(delay_ticks: u64) -> Self {
        Self {
            mode: TaskMode::Async,
            delay_ticks,
            period_ticks: None,
        }
    }

    pub fn async_repeating(delay_ticks: u64, period_ticks: u64) -> Self {
        Self {
            mode: TaskMode::Async,
            delay_ticks,
            period_ticks: Some(period_ticks),
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.period_ticks.is_some()
    }

    /// Rejects descriptors that cannot be scheduled.
    pub fn check(&self) -> Result<(), ClusterError> {
        if self.period_ticks == Some(0) {
            return Err(ClusterError::InvalidTask(
                "repeating task period must be at least one tick".to_string(),
            ));
        }
        Ok(())
    }
}

/// Handle to a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    abort: AbortHandle,
    registry: Arc<DashMap<u64, AbortHandle>>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stops the task. A run already in progress on the primary context completes.
    pub fn cancel(&self) {
        self.abort.abort();
        self.registry.remove(&self.id);
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Owner of the primary context and of scheduled tasks.
#[derive(Debug, Clone)]
pub struct Scheduler {
    primary: mpsc::UnboundedSender<Job>,
    tick: Duration,
    next_id: Arc<AtomicU64>,
    tasks: Arc<DashMap<u64, AbortHandle>>,
}

impl Scheduler {
    /// Starts the primary context on the current tokio runtime.
    pub fn new(tick: Duration) -> Self {
        let (primary, mut queue) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("❌ Job on the primary context panicked");
                }
            }
            debug!("Primary context stopped");
        });

        Self {
            primary,
            tick: if tick.is_zero() { DEFAULT_TICK } else { tick },
            next_id: Arc::new(AtomicU64::new(1)),
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn ticks(&self, ticks: u64) -> Duration {
        self.tick.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
    }

    /// Queues `f` on the primary context without waiting for it.
    pub fn execute<F>(&self, f: F) -> Result<(), ClusterError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.primary
            .send(Box::new(f))
            .map_err(|_| ClusterError::SchedulerClosed)
    }

    /// Runs `f` on the primary context and waits for its result.
    pub async fn call_sync<F, R>(&self, f: F) -> Result<R, ClusterError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move || {
            let _ = tx.send(f());
        })?;
        // A panicking job drops the sender
        rx.await.map_err(|_| ClusterError::SchedulerClosed)
    }

    /// Schedules a closure according to `descriptor`.
    ///
    /// Sync tasks run on the primary context. Async tasks run on the
    /// blocking pool so they can perform slow work without stalling
    /// either context.
    ///
    /// # Returns
    ///
    /// A [`TaskHandle`] for cancellation, or `InvalidTask` if the descriptor
    /// fails [`TaskDescriptor::check`].
    pub fn run_task<F>(&self, descriptor: TaskDescriptor, task: F) -> Result<TaskHandle, ClusterError>
    where
        F: FnMut() + Send + 'static,
    {
        descriptor.check()?;
        let task = Arc::new(Mutex::new(task));
        let scheduler = self.clone();

        self.spawn_schedule(descriptor, move || {
            let task = task.clone();
            let scheduler = scheduler.clone();
            async move {
                let run = move || {
                    if let Ok(mut task) = task.lock() {
                        (*task)();
                    }
                };
                match descriptor.mode {
                    TaskMode::Sync => scheduler.call_sync(run).await.is_ok(),
                    TaskMode::Async => tokio::task::spawn_blocking(run).await.is_ok(),
                }
            }
        })
    }

    /// Schedules an async closure off the primary context.
    pub fn run_future_task<F, Fut>(
        &self,
        descriptor: TaskDescriptor,
        mut task: F,
    ) -> Result<TaskHandle, ClusterError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        descriptor.check()?;
        if descriptor.mode != TaskMode::Async {
            return Err(ClusterError::InvalidTask(
                "future tasks cannot run on the primary context".to_string(),
            ));
        }
        self.spawn_schedule(descriptor, move || {
            let run = task();
            async move {
                run.await;
                true
            }
        })
    }

    /// Cancels every outstanding task.
    pub fn cancel_all(&self) {
        let ids: Vec<u64> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, abort)) = self.tasks.remove(&id) {
                abort.abort();
            }
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks.retain(|_, abort| !abort.is_finished());
        self.tasks.len()
    }

    /// Drives `run` after the delay and then once per period. `run` returns
    /// `false` once its context is gone, which ends the schedule.
    fn spawn_schedule<R, Fut>(&self, descriptor: TaskDescriptor, mut run: R) -> Result<TaskHandle, ClusterError>
    where
        R: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delay = self.ticks(descriptor.delay_ticks);
        let period = descriptor.period_ticks.map(|p| self.ticks(p));
        let tasks = self.tasks.clone();

        let join = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match period {
                None => {
                    run().await;
                }
                Some(period) => {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        interval.tick().await;
                        if !run().await {
                            debug!("Task {} stopped: execution context closed", id);
                            break;
                        }
                    }
                }
            }
            tasks.remove(&id);
        });

        let abort = join.abort_handle();
        self.tasks.insert(id, abort.clone());
        Ok(TaskHandle {
            id,
            abort,
            registry: self.tasks.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> Scheduler {
        Scheduler::new(Duration::from_millis(5))
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(TaskDescriptor::sync_repeating(0, 0).check().is_err());
        assert!(TaskDescriptor::async_repeating(1, 0).check().is_err());
        assert!(TaskDescriptor::sync_repeating(0, 1).check().is_ok());
        assert!(TaskDescriptor::async_once(0).check().is_ok());
    }

    #[tokio::test]
    async fn call_sync_returns_result() {
        let scheduler = scheduler();
        assert_eq!(scheduler.call_sync(|| 40 + 2).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn primary_context_runs_jobs_in_order() {
        let scheduler = scheduler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            scheduler
                .execute(move || seen.lock().unwrap().push(i))
                .unwrap();
        }
        scheduler.call_sync(|| ()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_primary_context() {
        let scheduler = scheduler();
        assert!(scheduler.call_sync(|| panic!("boom")).await.is_err());
        assert_eq!(scheduler.call_sync(|| 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn once_tasks_run_once() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        for descriptor in [TaskDescriptor::sync_once(1), TaskDescriptor::async_once(0)] {
            let count = count.clone();
            scheduler
                .run_task(descriptor, move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[tokio::test]
    async fn repeating_task_runs_until_cancelled() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = {
            let count = count.clone();
            scheduler
                .run_task(TaskDescriptor::sync_repeating(0, 1), move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 2, "expected several runs, got {after_cancel}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(count.load(Ordering::SeqCst) <= after_cancel + 1);
    }

    #[tokio::test]
    async fn future_tasks_must_be_async() {
        let scheduler = scheduler();
        let result = scheduler.run_future_task(TaskDescriptor::sync_once(0), || async {});
        assert!(matches!(result, Err(ClusterError::InvalidTask(_))));

        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        scheduler
            .run_future_task(TaskDescriptor::async_once(0), move || {
                let tx = tx.take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(());
                    }
                }
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    }
}
