//! Recording subscriber for unit tests.

#![allow(clippy::unwrap_used)]

use crate::error::FluxError;
use crate::protocol::{Subscriber, SubscriptionRef};
use crate::scheduler::{Scheduler, SchedulerRef, Task, TaskHandle};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct RecorderState<T> {
    values: Vec<T>,
    error: Option<FluxError>,
    completed: bool,
    terminals: usize,
    subscription: Option<SubscriptionRef>,
}

/// Records every signal and exposes the subscription to the test.
pub(crate) struct Recorder<T> {
    state: Arc<Mutex<RecorderState<T>>>,
    initial: u64,
}

pub(crate) struct RecordingSubscriber<T> {
    state: Arc<Mutex<RecorderState<T>>>,
    initial: u64,
}

impl<T> Recorder<T> {
    pub(crate) fn with_demand(initial: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                values: Vec::new(),
                error: None,
                completed: false,
                terminals: 0,
                subscription: None,
            })),
            initial,
        }
    }

    pub(crate) fn unbounded() -> Self {
        Self::with_demand(crate::protocol::UNBOUNDED)
    }

    pub(crate) fn subscriber(&self) -> RecordingSubscriber<T> {
        RecordingSubscriber {
            state: Arc::clone(&self.state),
            initial: self.initial,
        }
    }

    pub(crate) fn request(&self, n: u64) {
        let subscription = self.state.lock().unwrap().subscription.clone();
        subscription.unwrap().request(n);
    }

    pub(crate) fn cancel(&self) {
        let subscription = self.state.lock().unwrap().subscription.clone();
        subscription.unwrap().cancel();
    }

    pub(crate) fn error(&self) -> Option<FluxError> {
        self.state.lock().unwrap().error.clone()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.state.lock().unwrap().completed
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.state.lock().unwrap().terminals
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminal_count() > 0
    }
}

impl<T: Clone> Recorder<T> {
    pub(crate) fn values(&self) -> Vec<T> {
        self.state.lock().unwrap().values.clone()
    }
}

impl<T: Send> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.state.lock().unwrap().subscription = Some(Arc::clone(&subscription));
        if self.initial > 0 {
            subscription.request(self.initial);
        }
    }

    fn on_next(&mut self, value: T) {
        self.state.lock().unwrap().values.push(value);
    }

    fn on_error(&mut self, error: FluxError) {
        let mut state = self.state.lock().unwrap();
        state.error = Some(error);
        state.terminals += 1;
    }

    fn on_complete(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.completed = true;
        state.terminals += 1;
    }
}

impl<T> Recorder<T> {
    /// Poll until a terminal signal arrived or `timeout` elapsed.
    pub(crate) fn await_terminal(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_terminated() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.is_terminated()
    }
}

/// Runs every task on a fresh named thread.
#[derive(Debug)]
pub(crate) struct ThreadScheduler {
    name: &'static str,
    epoch: Instant,
}

impl ThreadScheduler {
    pub(crate) fn shared(name: &'static str) -> SchedulerRef {
        Arc::new(Self {
            name,
            epoch: Instant::now(),
        })
    }
}

impl Scheduler for ThreadScheduler {
    fn name(&self) -> &str {
        self.name
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, task: Task) -> TaskHandle {
        self.schedule_after(Duration::ZERO, task)
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let task = handle.guard(task);
        thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || {
                thread::sleep(delay);
                task();
            })
            .unwrap();
        handle
    }
}

pub(crate) fn current_thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_string()
}
