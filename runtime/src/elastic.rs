//! Elastic scheduler backed by the tokio blocking pool.
//!
//! Workers are created on demand up to a cap and retired after an idle
//! period, which suits tasks that block on I/O (drivers, file systems, legacy
//! clients). Delays are measured by the tokio timer and the task then runs on
//! a blocking worker.

use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use rill_core::{Scheduler, SchedulerRef, Task, TaskHandle};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};

/// Hard ceiling on elastic workers, matching the tokio blocking pool default.
const MAX_WORKERS_CAP: usize = 512;

/// Configuration for [`ElasticScheduler`].
///
/// # Default Values
///
/// - `max_workers`: 10 per CPU, at most 512
/// - `keep_alive`: 60 seconds
/// - `thread_name`: `"rill-elastic"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticConfig {
    /// Maximum number of simultaneously running workers
    pub max_workers: usize,
    /// How long an idle worker is kept before it exits
    pub keep_alive: Duration,
    /// Name given to worker threads, also used as the metric label
    pub thread_name: String,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            max_workers: (cpus * 10).min(MAX_WORKERS_CAP),
            keep_alive: Duration::from_secs(60),
            thread_name: "rill-elastic".to_string(),
        }
    }
}

impl ElasticConfig {
    /// Set the worker cap (minimum 1, at most 512).
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, MAX_WORKERS_CAP);
        self
    }

    /// Set the idle time after which a worker exits.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the worker thread name.
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

/// A growable pool of worker threads for blocking tasks.
///
/// Dropping the last reference shuts the pool down without waiting for
/// running tasks; tasks that have not started are discarded.
pub struct ElasticScheduler {
    name: Arc<str>,
    runtime: Option<Runtime>,
    handle: Handle,
    epoch: Instant,
}

impl fmt::Debug for ElasticScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticScheduler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ElasticScheduler {
    /// Build a pool with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Build`] if the worker pool cannot be created.
    pub fn new(config: ElasticConfig) -> Result<Arc<Self>, SchedulerError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_workers.max(1))
            .thread_keep_alive(config.keep_alive)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()?;
        tracing::debug!(
            name = %config.thread_name,
            max_workers = config.max_workers,
            keep_alive_ms = config.keep_alive.as_millis(),
            "Elastic scheduler started"
        );
        Ok(Arc::new(Self {
            name: Arc::from(config.thread_name),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            epoch: Instant::now(),
        }))
    }

    /// This scheduler as a [`SchedulerRef`] for operators.
    #[must_use]
    pub fn as_scheduler(self: &Arc<Self>) -> SchedulerRef {
        Arc::clone(self) as SchedulerRef
    }

    fn run_blocking(handle: &Handle, name: Arc<str>, task: Task) {
        SchedulerMetrics::record_submitted(&name);
        handle.spawn_blocking(move || {
            let _active = SchedulerMetrics::track(&name);
            tracing::trace!(scheduler = %name, "Running elastic task");
            task();
        });
    }
}

impl Scheduler for ElasticScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        Self::run_blocking(&self.handle, Arc::clone(&self.name), handle.guard(task));
        handle
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
        if delay.is_zero() {
            return self.schedule(task);
        }
        let handle = TaskHandle::new();
        let guarded = handle.guard(task);
        let (pool, name, cancelled) = (self.handle.clone(), Arc::clone(&self.name), handle.clone());
        tracing::trace!(scheduler = %self.name, delay_ms = delay.as_millis(), "Scheduling delayed task");
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.is_cancelled() {
                Self::run_blocking(&pool, name, guarded);
            }
        });
        handle
    }
}

impl Drop for ElasticScheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            tracing::debug!(name = %self.name, "Elastic scheduler stopping");
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn worker_name() -> String {
        std::thread::current().name().unwrap_or("unnamed").to_string()
    }

    #[test]
    fn default_config() {
        let config = ElasticConfig::default();
        assert!(config.max_workers >= 10);
        assert!(config.max_workers <= MAX_WORKERS_CAP);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.thread_name, "rill-elastic");
        assert_eq!(config.with_max_workers(0).max_workers, 1);
    }

    #[test]
    fn runs_tasks_on_named_workers() {
        let scheduler = ElasticScheduler::new(ElasticConfig::default().with_thread_name("io")).unwrap();
        let (sender, receiver) = mpsc::channel();
        scheduler.schedule(Box::new(move || sender.send(worker_name()).unwrap()));
        let name = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name, "io");
        assert_eq!(scheduler.name(), "io");
    }

    #[test]
    fn delayed_tasks_wait() {
        let scheduler = ElasticScheduler::new(ElasticConfig::default()).unwrap();
        let (sender, receiver) = mpsc::channel();
        let started = Instant::now();
        scheduler.schedule_after(
            Duration::from_millis(30),
            Box::new(move || sender.send(()).unwrap()),
        );
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn cancelled_tasks_do_not_run() {
        let scheduler = ElasticScheduler::new(ElasticConfig::default()).unwrap();
        let (sender, receiver) = mpsc::channel::<()>();
        let handle = scheduler.schedule_after(
            Duration::from_millis(50),
            Box::new(move || sender.send(()).unwrap()),
        );
        handle.cancel();
        assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn tasks_run_concurrently() {
        let scheduler = ElasticScheduler::new(ElasticConfig::default().with_max_workers(4)).unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(3));
        let (sender, receiver) = mpsc::channel();
        for _ in 0..3 {
            let (barrier, sender) = (Arc::clone(&barrier), sender.clone());
            scheduler.schedule(Box::new(move || {
                barrier.wait();
                sender.send(()).unwrap();
            }));
        }
        for _ in 0..3 {
            receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        }
    }
}
