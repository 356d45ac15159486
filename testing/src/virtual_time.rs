//! A scheduler driven by an explicit virtual clock.
//!
//! Tasks never run on their own: they run when the test advances the clock
//! to or beyond their deadline, on the thread that advances it. Tasks due at
//! the current virtual time run as soon as they are scheduled. Ties between
//! tasks with the same deadline are broken by submission order.

use crate::lock;
use rill_core::{Scheduler, SchedulerRef, Task, TaskHandle, WorkInProgress};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Entry {
    deadline: Duration,
    seq: u64,
    task: Task,
    handle: TaskHandle,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct Clock {
    now: Duration,
    /// Time the clock may run up to during the current drain.
    horizon: Duration,
    queue: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    shut_down: bool,
}

/// Deterministic scheduler for tests.
///
/// # Example
///
/// ```
/// use rill_core::Mono;
/// use rill_testing::VirtualTimeScheduler;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::time::Duration;
///
/// let scheduler = VirtualTimeScheduler::new();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&fired);
/// let _subscription = Mono::delay(Duration::from_secs(60), scheduler.as_scheduler())
///     .subscribe(move |_| flag.store(true, Ordering::SeqCst));
/// assert!(!fired.load(Ordering::SeqCst));
/// scheduler.advance_time_by(Duration::from_secs(60));
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct VirtualTimeScheduler {
    clock: Mutex<Clock>,
    wip: WorkInProgress,
}

impl fmt::Debug for VirtualTimeScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clock = lock(&self.clock);
        f.debug_struct("VirtualTimeScheduler")
            .field("now", &clock.now)
            .field("pending", &clock.queue.len())
            .finish()
    }
}

impl VirtualTimeScheduler {
    /// A scheduler whose clock starts at zero.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: Mutex::new(Clock::default()),
            wip: WorkInProgress::new(),
        })
    }

    /// This scheduler as a [`SchedulerRef`] for operators.
    #[must_use]
    pub fn as_scheduler(self: &Arc<Self>) -> SchedulerRef {
        Arc::clone(self) as SchedulerRef
    }

    /// Current virtual time.
    #[must_use]
    pub fn virtual_now(&self) -> Duration {
        lock(&self.clock).now
    }

    /// Number of tasks waiting for their deadline.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        lock(&self.clock).queue.len()
    }

    /// Move the clock forward by `delta`, running every task that falls due.
    pub fn advance_time_by(&self, delta: Duration) {
        let target = lock(&self.clock).now.saturating_add(delta);
        self.advance_time_to(target);
    }

    /// Move the clock to `instant`, running every task that falls due.
    ///
    /// Moving backwards is a no-op.
    pub fn advance_time_to(&self, instant: Duration) {
        {
            let mut clock = lock(&self.clock);
            if instant > clock.horizon {
                clock.horizon = instant;
            }
        }
        tracing::trace!(to = ?instant, "Advancing virtual time");
        self.drain();
    }

    /// Run the tasks due at the current virtual time.
    pub fn advance_time(&self) {
        self.drain();
    }

    /// Drop every pending task and refuse new ones.
    pub fn shutdown(&self) {
        let dropped = {
            let mut clock = lock(&self.clock);
            clock.shut_down = true;
            std::mem::take(&mut clock.queue)
        };
        tracing::debug!(dropped = dropped.len(), "Virtual time scheduler shut down");
        for Reverse(entry) in dropped {
            entry.handle.cancel();
        }
    }

    fn enqueue(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        {
            let mut clock = lock(&self.clock);
            if clock.shut_down {
                handle.cancel();
                return handle;
            }
            let seq = clock.next_seq;
            clock.next_seq += 1;
            let deadline = clock.now.saturating_add(delay);
            clock.queue.push(Reverse(Entry {
                deadline,
                seq,
                task,
                handle: handle.clone(),
            }));
        }
        self.drain();
        handle
    }

    fn next_due(&self) -> Option<Entry> {
        let mut clock = lock(&self.clock);
        let due = matches!(clock.queue.peek(), Some(Reverse(entry)) if entry.deadline <= clock.horizon);
        if !due {
            clock.now = clock.horizon;
            return None;
        }
        let Reverse(entry) = clock.queue.pop()?;
        if entry.deadline > clock.now {
            clock.now = entry.deadline;
        }
        Some(entry)
    }

    fn drain(&self) {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            while let Some(entry) = self.next_due() {
                if !entry.handle.is_cancelled() {
                    (entry.task)();
                }
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }
}

impl Scheduler for VirtualTimeScheduler {
    fn name(&self) -> &str {
        "virtual"
    }

    fn now(&self) -> Duration {
        self.virtual_now()
    }

    fn schedule(&self, task: Task) -> TaskHandle {
        self.enqueue(Duration::ZERO, task)
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
        self.enqueue(delay, task)
    }
}
