//! Sequential composition.

use super::{Downstream, SubscriptionArbiter};
use crate::demand::WorkInProgress;
use crate::error::FluxError;
use crate::flux::Flux;
use crate::protocol::{Subscriber, Subscription, SubscriptionRef};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct ConcatState<T> {
    remaining: Mutex<VecDeque<Flux<T>>>,
    arbiter: SubscriptionArbiter,
    downstream: Downstream<T>,
    wip: WorkInProgress,
}

impl<T: Send + 'static> ConcatState<T> {
    /// Subscribe to the next source, or complete when none is left.
    ///
    /// Runs as a trampoline: a source completing synchronously during its own
    /// subscription only schedules another pass of this loop.
    fn subscribe_next(self: &Arc<Self>) {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            if self.downstream.is_done() {
                return;
            }
            let next = lock(&self.remaining).pop_front();
            match next {
                Some(source) => source.subscribe_raw(ConcatSubscriber {
                    state: Arc::clone(self),
                }),
                None => {
                    self.downstream.complete();
                    return;
                }
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for ConcatState<T> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        if self.downstream.cancel() {
            self.arbiter.cancel();
            lock(&self.remaining).clear();
        }
    }
}

struct ConcatSubscriber<T> {
    state: Arc<ConcatState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ConcatSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.state.arbiter.set(subscription);
    }

    fn on_next(&mut self, value: T) {
        self.state.arbiter.produced(1);
        self.state.downstream.next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        lock(&self.state.remaining).clear();
        self.state.downstream.error(error);
    }

    fn on_complete(&mut self) {
        self.state.arbiter.clear();
        self.state.subscribe_next();
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Emit every value of each source in turn.
    ///
    /// Source `k + 1` is subscribed only after source `k` completed. An error
    /// from any source terminates the sequence and the remaining sources are
    /// never subscribed.
    pub fn concat(sources: impl IntoIterator<Item = Self>) -> Self {
        let sources: Vec<Self> = sources.into_iter().collect();
        Self::from_fn(move |mut downstream| {
            let state = Arc::new(ConcatState {
                remaining: Mutex::new(sources.iter().cloned().collect()),
                arbiter: SubscriptionArbiter::new(),
                downstream: Downstream::new(),
                wip: WorkInProgress::new(),
            });
            downstream.on_subscribe(Arc::clone(&state) as SubscriptionRef);
            state.downstream.set(downstream);
            state.subscribe_next();
        })
    }

    /// Emit every value of `self`, then every value of `other`.
    #[must_use]
    pub fn concat_with(self, other: Self) -> Self {
        Self::concat([self, other])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn preserves_per_source_order() {
        let recorder = Recorder::unbounded();
        Flux::just([1, 2])
            .concat_with(Flux::just([3, 4]))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![1, 2, 3, 4]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn carries_demand_across_sources() {
        let recorder = Recorder::with_demand(3);
        Flux::concat([Flux::just([1, 2]), Flux::just([3, 4])]).subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![1, 2, 3]);
        recorder.request(1);
        assert_eq!(recorder.values(), vec![1, 2, 3, 4]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn error_short_circuits_remaining_sources() {
        let subscribed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&subscribed);
        let recorder = Recorder::unbounded();
        Flux::concat([
            Flux::just([1]),
            Flux::error(FluxError::message("boom")),
            Flux::just([2]).do_on_subscribe(move || flag.store(true, Ordering::SeqCst)),
        ])
        .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![1]);
        assert!(recorder.error().is_some());
        assert!(!subscribed.load(Ordering::SeqCst));
    }

    #[test]
    fn many_empty_sources_do_not_grow_the_stack() {
        let recorder = Recorder::<i32>::unbounded();
        Flux::concat((0..100_000).map(|_| Flux::empty())).subscribe_raw(recorder.subscriber());
        assert!(recorder.is_completed());
    }

    #[test]
    fn empty_concat_completes() {
        let recorder = Recorder::<i32>::unbounded();
        Flux::concat(Vec::new()).subscribe_raw(recorder.subscriber());
        assert!(recorder.is_completed());
    }
}
