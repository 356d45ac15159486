//! Resubscription after errors.

use super::{Downstream, SubscriptionArbiter};
use crate::demand::WorkInProgress;
use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{Subscriber, Subscription, SubscriptionRef};
use crate::scheduler::{SchedulerRef, TaskHandle};
use crate::sync::lock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Decides, per failed attempt, whether and after which delay to resubscribe.
///
/// Receives the error and the 1-based retry number.
type RetryDecision = Arc<dyn Fn(&FluxError, u32) -> Option<Duration> + Send + Sync>;

struct RetryState<T> {
    source: Flux<T>,
    arbiter: SubscriptionArbiter,
    downstream: Downstream<T>,
    wip: WorkInProgress,
    decide: RetryDecision,
    scheduler: Option<SchedulerRef>,
    attempts: AtomicU32,
    pending: Mutex<Option<TaskHandle>>,
}

impl<T: Send + 'static> RetryState<T> {
    fn resubscribe(self: &Arc<Self>) {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            if self.downstream.is_done() {
                return;
            }
            self.source.subscribe_raw(RetrySubscriber {
                state: Arc::clone(self),
            });
            missed = self.wip.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    fn retry(self: &Arc<Self>, error: FluxError) {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let decide = &self.decide;
        let delay = match guard(|| decide(&error, attempt)) {
            Ok(Some(delay)) => delay,
            Ok(None) => {
                self.downstream.error(error);
                return;
            }
            Err(panic) => {
                self.downstream.error(panic);
                return;
            }
        };
        tracing::warn!(attempt, ?delay, error = %error, "Retrying after error");
        self.arbiter.clear();
        match &self.scheduler {
            Some(scheduler) if !delay.is_zero() => {
                let state = Arc::clone(self);
                let handle =
                    scheduler.schedule_after(delay, Box::new(move || state.resubscribe()));
                *lock(&self.pending) = Some(handle);
            }
            _ => self.resubscribe(),
        }
    }
}

impl<T: Send + 'static> Subscription for RetryState<T> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        if self.downstream.cancel() {
            self.arbiter.cancel();
            let pending = lock(&self.pending).take();
            if let Some(handle) = pending {
                handle.cancel();
            }
        }
    }
}

struct RetrySubscriber<T> {
    state: Arc<RetryState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for RetrySubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.state.arbiter.set(subscription);
    }

    fn on_next(&mut self, value: T) {
        self.state.arbiter.produced(1);
        self.state.downstream.next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        self.state.retry(error);
    }

    fn on_complete(&mut self) {
        self.state.downstream.complete();
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Resubscribe after an error, as decided by `decide`.
    ///
    /// `decide` receives the error and the 1-based retry number and returns
    /// the delay before the next attempt, or `None` to give up and propagate
    /// the error. Non-zero delays are waited on `scheduler`.
    ///
    /// Values emitted by failed attempts are not retracted: a retried
    /// sequence replays from its start.
    #[must_use]
    pub fn retry_when<F>(self, scheduler: SchedulerRef, decide: F) -> Self
    where
        F: Fn(&FluxError, u32) -> Option<Duration> + Send + Sync + 'static,
    {
        self.retry_with(Arc::new(decide), Some(scheduler))
    }

    /// Resubscribe immediately after an error, at most `max_retries` times.
    #[must_use]
    pub fn retry(self, max_retries: u32) -> Self {
        self.retry_with(
            Arc::new(move |_: &FluxError, attempt: u32| {
                (attempt <= max_retries).then_some(Duration::ZERO)
            }),
            None,
        )
    }

    fn retry_with(self, decide: RetryDecision, scheduler: Option<SchedulerRef>) -> Self {
        Self::from_fn(move |mut downstream| {
            let state = Arc::new(RetryState {
                source: self.clone(),
                arbiter: SubscriptionArbiter::new(),
                downstream: Downstream::new(),
                wip: WorkInProgress::new(),
                decide: Arc::clone(&decide),
                scheduler: scheduler.clone(),
                attempts: AtomicU32::new(0),
                pending: Mutex::new(None),
            });
            downstream.on_subscribe(Arc::clone(&state) as SubscriptionRef);
            state.downstream.set(downstream);
            state.resubscribe();
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::scheduler::immediate;
    use crate::test_support::Recorder;
    use std::sync::atomic::AtomicUsize;

    fn flaky(failures: usize) -> (Flux<i32>, Arc<AtomicUsize>) {
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&subscriptions);
        let flux = Flux::defer(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < failures {
                Flux::just([1]).concat_with(Flux::error(FluxError::message("flaky")))
            } else {
                Flux::just([1, 2])
            }
        });
        (flux, subscriptions)
    }

    #[test]
    fn retry_resubscribes_until_success() {
        let (source, subscriptions) = flaky(2);
        let recorder = Recorder::unbounded();
        source.retry(3).subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![1, 1, 1, 2]);
        assert!(recorder.is_completed());
        assert_eq!(subscriptions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_max() {
        let (source, subscriptions) = flaky(10);
        let recorder = Recorder::unbounded();
        source.retry(2).subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![1, 1, 1]);
        assert_eq!(recorder.error().unwrap().to_string(), "flaky");
        assert_eq!(subscriptions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_when_consults_the_decision() {
        let recorder = Recorder::<i32>::unbounded();
        Flux::error(FluxError::message("fatal"))
            .retry_when(immediate(), |error, _| {
                (error.to_string() != "fatal").then_some(Duration::from_millis(1))
            })
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.error().unwrap().to_string(), "fatal");
    }

    #[test]
    fn retry_when_waits_on_the_scheduler() {
        let (source, _) = flaky(1);
        let recorder = Recorder::unbounded();
        source
            .retry_when(immediate(), |_, attempt| {
                (attempt <= 1).then_some(Duration::from_millis(5))
            })
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![1, 1, 2]);
        assert!(recorder.is_completed());
    }
}
