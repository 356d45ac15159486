//! Execution contexts.
//!
//! A [`Scheduler`] accepts a task and runs it on a worker it owns, either as
//! soon as possible or after a delay measured on the scheduler's own clock.
//! Schedulers are always passed explicitly as [`SchedulerRef`] values; there is
//! no global default to swap out.
//!
//! This crate ships the [`ImmediateScheduler`]. The elastic worker pool lives
//! in `rill-runtime` and the virtual-time scheduler in `rill-testing`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A unit of work submitted to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work run on every tick of a periodic schedule.
pub type PeriodicTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Shared handle to an execution context.
pub type SchedulerRef = Arc<dyn Scheduler>;

/// An execution context.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Name used in logs and metric labels.
    fn name(&self) -> &str;

    /// Current time on this scheduler's clock, relative to its own epoch.
    fn now(&self) -> Duration;

    /// Run `task` as soon as possible on a worker of this context.
    fn schedule(&self, task: Task) -> TaskHandle;

    /// Run `task` once `delay` has elapsed on this scheduler's clock.
    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle;
}

/// Cancellation handle of a scheduled task.
///
/// Cancelling prevents a task that has not started yet from running. A task
/// already running is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// A handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from starting.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Wrap `task` so it becomes a no-op once this handle is cancelled.
    #[must_use]
    pub fn guard(&self, task: Task) -> Task {
        let handle = self.clone();
        Box::new(move || {
            if !handle.is_cancelled() {
                task();
            }
        })
    }
}

/// Run `task` after `initial`, then every `period`, until the handle is
/// cancelled.
///
/// Deadlines are computed from the first deadline rather than from the actual
/// run time of the previous tick, so a slow tick does not shift later ones.
pub fn schedule_periodically(
    scheduler: &SchedulerRef,
    initial: Duration,
    period: Duration,
    task: PeriodicTask,
) -> TaskHandle {
    let handle = TaskHandle::new();
    run_periodically(scheduler, &handle, initial, period, task);
    handle
}

/// Like [`schedule_periodically`], stopping when an existing handle is
/// cancelled.
///
/// Needed when the first tick may run before this call returns, as it does on
/// the immediate scheduler.
pub(crate) fn run_periodically(
    scheduler: &SchedulerRef,
    handle: &TaskHandle,
    initial: Duration,
    period: Duration,
    task: PeriodicTask,
) {
    let deadline = scheduler.now() + initial;
    schedule_tick(Arc::clone(scheduler), handle.clone(), task, deadline, period);
}

fn schedule_tick(
    scheduler: SchedulerRef,
    handle: TaskHandle,
    task: PeriodicTask,
    deadline: Duration,
    period: Duration,
) {
    let delay = deadline.saturating_sub(scheduler.now());
    let next = Arc::clone(&scheduler);
    scheduler.schedule_after(
        delay,
        Box::new(move || {
            if handle.is_cancelled() {
                return;
            }
            task();
            if handle.is_cancelled() {
                return;
            }
            schedule_tick(next, handle, task, deadline + period, period);
        }),
    );
}

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<(Instant, Task)>>> = const { RefCell::new(None) };
}

/// Resets the trampoline when the outermost task returns or unwinds.
struct TrampolineGuard;

impl Drop for TrampolineGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|queue| queue.borrow_mut().take());
    }
}

/// Runs tasks synchronously on the calling thread.
///
/// Tasks scheduled from inside a running task are queued on a thread-local
/// trampoline and run after the current one returns, so recursive scheduling
/// never grows the stack. A delayed task blocks the calling thread until its
/// deadline.
#[derive(Debug, Clone)]
pub struct ImmediateScheduler {
    epoch: Instant,
}

impl Default for ImmediateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ImmediateScheduler {
    /// Create an immediate scheduler whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    fn run(deadline: Instant, task: Task) {
        let nested = TRAMPOLINE.with(|queue| {
            let mut queue = queue.borrow_mut();
            match queue.as_mut() {
                Some(pending) => {
                    pending.push_back((deadline, task));
                    None
                }
                None => {
                    *queue = Some(VecDeque::new());
                    Some(task)
                }
            }
        });
        let Some(first) = nested else {
            return;
        };

        let _reset = TrampolineGuard;
        Self::run_at(deadline, first);
        loop {
            let next =
                TRAMPOLINE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front));
            match next {
                Some((deadline, task)) => Self::run_at(deadline, task),
                None => break,
            }
        }
    }

    fn run_at(deadline: Instant, task: Task) {
        let wait = deadline.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        task();
    }
}

impl Scheduler for ImmediateScheduler {
    fn name(&self) -> &str {
        "immediate"
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        tracing::trace!(scheduler = "immediate", "Running task");
        Self::run(Instant::now(), handle.guard(task));
        handle
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        tracing::trace!(scheduler = "immediate", ?delay, "Running delayed task");
        Self::run(Instant::now() + delay, handle.guard(task));
        handle
    }
}

/// Shared immediate scheduler.
#[must_use]
pub fn immediate() -> SchedulerRef {
    Arc::new(ImmediateScheduler::new())
}
