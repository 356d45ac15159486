//! In-memory repositories.
//!
//! Both repositories record which thread served each call, so tests can
//! assert that blocking work was moved off the caller's thread.

use crate::lock;
use rill_core::{Flux, SchedulerRef};
use rill_runtime::repository::{BlockingRepository, ReactiveRepository};
use std::fmt;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

fn current_thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_string()
}

/// A blocking repository backed by a `Vec`.
///
/// `save` appends, `find_all` returns a snapshot. An optional call delay
/// sleeps the serving thread to simulate a slow driver.
#[derive(Debug, Default)]
pub struct InMemoryBlockingRepository<R> {
    records: Mutex<Vec<R>>,
    call_delay: Option<Duration>,
    save_threads: Mutex<Vec<String>>,
    find_all_threads: Mutex<Vec<String>>,
}

impl<R> InMemoryBlockingRepository<R> {
    /// A repository pre-filled with `records`.
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = R>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
            call_delay: None,
            save_threads: Mutex::new(Vec::new()),
            find_all_threads: Mutex::new(Vec::new()),
        }
    }

    /// Sleep for `delay` on every call.
    #[must_use]
    pub const fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// Names of the threads `save` ran on, in call order.
    pub fn save_threads(&self) -> Vec<String> {
        lock(&self.save_threads).clone()
    }

    /// Names of the threads `find_all` ran on, in call order.
    pub fn find_all_threads(&self) -> Vec<String> {
        lock(&self.find_all_threads).clone()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        lock(&self.save_threads).len()
    }

    fn simulate_latency(&self) {
        if let Some(delay) = self.call_delay {
            thread::sleep(delay);
        }
    }
}

impl<R: Clone> InMemoryBlockingRepository<R> {
    /// Snapshot of every stored record.
    pub fn records(&self) -> Vec<R> {
        lock(&self.records).clone()
    }
}

impl<R: Clone + Send> BlockingRepository<R> for InMemoryBlockingRepository<R> {
    fn find_all(&self) -> Vec<R> {
        lock(&self.find_all_threads).push(current_thread_name());
        self.simulate_latency();
        lock(&self.records).clone()
    }

    fn save(&self, record: R) {
        let thread = current_thread_name();
        tracing::trace!(thread = %thread, "Saving record");
        self.simulate_latency();
        lock(&self.records).push(record);
        lock(&self.save_threads).push(thread);
    }
}

/// A reactive repository serving a fixed set of records.
pub struct InMemoryReactiveRepository<R> {
    records: Vec<R>,
    element_delay: Option<(Duration, SchedulerRef)>,
}

impl<R: fmt::Debug> fmt::Debug for InMemoryReactiveRepository<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryReactiveRepository")
            .field("records", &self.records)
            .field("element_delay", &self.element_delay.as_ref().map(|(delay, _)| delay))
            .finish()
    }
}

impl<R> InMemoryReactiveRepository<R> {
    /// A repository serving `records` without delay.
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = R>) -> Self {
        Self {
            records: records.into_iter().collect(),
            element_delay: None,
        }
    }

    /// Delay every record by `delay` on `scheduler`.
    #[must_use]
    pub fn with_element_delay(mut self, delay: Duration, scheduler: SchedulerRef) -> Self {
        self.element_delay = Some((delay, scheduler));
        self
    }
}

impl<R: Clone + Send + Sync + 'static> ReactiveRepository<R> for InMemoryReactiveRepository<R> {
    fn find_all(&self) -> Flux<R> {
        let records = Flux::from_iter(self.records.clone());
        match &self.element_delay {
            Some((delay, scheduler)) => records.delay_elements(*delay, SchedulerRef::clone(scheduler)),
            None => records,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::StepVerifier;

    #[test]
    fn blocking_repository_records_threads() {
        let repository = InMemoryBlockingRepository::new(["a"]);
        thread::scope(|scope| {
            thread::Builder::new()
                .name("writer".to_string())
                .spawn_scoped(scope, || repository.save("b"))
                .unwrap()
                .join()
                .unwrap();
        });
        assert_eq!(repository.records(), vec!["a", "b"]);
        assert_eq!(repository.save_threads(), vec!["writer".to_string()]);
        assert_eq!(repository.find_all(), vec!["a", "b"]);
        assert_eq!(repository.find_all_threads().len(), 1);
    }

    #[test]
    fn reactive_repository_delays_each_record() {
        StepVerifier::with_virtual_time(|scheduler| {
            InMemoryReactiveRepository::new(["x", "y"])
                .with_element_delay(Duration::from_secs(1), scheduler)
                .find_all()
        })
        .expect_no_event(Duration::from_millis(999))
        .then_await(Duration::from_millis(1))
        .expect_next("x")
        .then_await(Duration::from_secs(1))
        .expect_next("y")
        .verify_complete()
        .unwrap();
    }

    #[test]
    fn reactive_repository_without_delay() {
        let repository = InMemoryReactiveRepository::new([1, 2]);
        StepVerifier::create(repository.find_all())
            .expect_next_seq([1, 2])
            .verify_complete()
            .unwrap();
    }
}
