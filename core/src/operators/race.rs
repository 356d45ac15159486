//! First-to-signal selection among several sequences.

use super::Downstream;
use crate::demand::{Demand, WorkInProgress};
use crate::error::FluxError;
use crate::flux::Flux;
use crate::protocol::{Subscriber, Subscription, SubscriptionRef, UNBOUNDED};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const NO_WINNER: usize = usize::MAX;

/// Terminal outcome of the winner: `None` is completion.
type Outcome = Option<FluxError>;

struct RaceState<T> {
    downstream: Downstream<T>,
    winner: AtomicUsize,
    requested: Demand,
    candidates: Mutex<Vec<Option<SubscriptionRef>>>,
    queue: Mutex<VecDeque<T>>,
    outcome: Mutex<Option<Outcome>>,
    wip: WorkInProgress,
    ready: AtomicBool,
    invalid: AtomicBool,
}

impl<T: Send + 'static> RaceState<T> {
    /// Returns whether `index` owns the sequence, electing it if nobody does.
    fn claim(&self, index: usize) -> bool {
        match self
            .winner
            .compare_exchange(NO_WINNER, index, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::trace!(index, "Race won");
                let losers: Vec<SubscriptionRef> = lock(&self.candidates)
                    .iter_mut()
                    .enumerate()
                    .filter(|(candidate, _)| *candidate != index)
                    .filter_map(|(_, slot)| slot.take())
                    .collect();
                for loser in losers {
                    loser.cancel();
                }
                true
            }
            Err(current) => current == index,
        }
    }

    fn cancel_all(&self) {
        let candidates: Vec<SubscriptionRef> = lock(&self.candidates)
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for candidate in candidates {
            candidate.cancel();
        }
    }

    fn finish(&self, outcome: Outcome) {
        *lock(&self.outcome) = Some(outcome);
        self.drain();
    }

    /// Emit queued winner values within the downstream demand.
    ///
    /// Candidates run with unbounded demand, so the queue is where the
    /// downstream demand is enforced. Nothing is emitted before the
    /// downstream subscriber is installed.
    fn drain(&self) {
        if !self.ready.load(Ordering::Acquire) || !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            if self.downstream.is_done() {
                lock(&self.queue).clear();
                return;
            }
            if self.invalid.swap(false, Ordering::AcqRel) {
                lock(&self.queue).clear();
                self.cancel_all();
                self.downstream.error(FluxError::InvalidDemand(0));
                return;
            }
            let requested = self.requested.get();
            let mut emitted = 0;
            while emitted < requested && !self.downstream.is_done() {
                let item = lock(&self.queue).pop_front();
                let Some(value) = item else {
                    break;
                };
                self.downstream.next(value);
                emitted += 1;
            }
            self.requested.produced(emitted);
            if lock(&self.queue).is_empty() {
                let outcome = lock(&self.outcome).take();
                if let Some(outcome) = outcome {
                    match outcome {
                        Some(error) => self.downstream.error(error),
                        None => self.downstream.complete(),
                    };
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

impl<T: Send + 'static> Subscription for RaceState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.invalid.store(true, Ordering::Release);
        } else {
            self.requested.add(n);
        }
        self.drain();
    }

    fn cancel(&self) {
        if self.downstream.cancel() {
            self.cancel_all();
            lock(&self.queue).clear();
        }
    }
}

struct RaceSubscriber<T> {
    state: Arc<RaceState<T>>,
    index: usize,
    upstream: Option<SubscriptionRef>,
}

impl<T: Send + 'static> RaceSubscriber<T> {
    fn lost(&mut self) {
        if let Some(upstream) = self.upstream.take() {
            upstream.cancel();
        }
    }

    fn is_loser(&self) -> bool {
        let winner = self.state.winner.load(Ordering::Acquire);
        winner != NO_WINNER && winner != self.index
    }
}

impl<T: Send + 'static> Subscriber<T> for RaceSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.state.downstream.is_done() || self.is_loser() {
            subscription.cancel();
            return;
        }
        self.upstream = Some(Arc::clone(&subscription));
        lock(&self.state.candidates)[self.index] = Some(Arc::clone(&subscription));
        // A winner elected meanwhile did not see this slot.
        if self.is_loser() || self.state.downstream.is_done() {
            lock(&self.state.candidates)[self.index] = None;
            self.lost();
            return;
        }
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, value: T) {
        if self.state.claim(self.index) {
            lock(&self.state.queue).push_back(value);
            self.state.drain();
        } else {
            self.lost();
        }
    }

    fn on_error(&mut self, error: FluxError) {
        if self.state.claim(self.index) {
            self.state.finish(Some(error));
        }
    }

    fn on_complete(&mut self) {
        if self.state.claim(self.index) {
            self.state.finish(None);
        }
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Mirror whichever source signals first, cancelling the others.
    ///
    /// Every source is subscribed with unbounded demand. The first one to
    /// emit any signal (value, error or completion) wins and the others are
    /// cancelled. The winner's values are queued and handed downstream as
    /// demand arrives. Without sources the result completes immediately.
    pub fn first(sources: impl IntoIterator<Item = Self>) -> Self {
        let sources: Vec<Self> = sources.into_iter().collect();
        if sources.is_empty() {
            return Self::empty();
        }
        Self::from_fn(move |mut downstream| {
            let state = Arc::new(RaceState {
                downstream: Downstream::new(),
                winner: AtomicUsize::new(NO_WINNER),
                requested: Demand::new(),
                candidates: Mutex::new(vec![None; sources.len()]),
                queue: Mutex::new(VecDeque::new()),
                outcome: Mutex::new(None),
                wip: WorkInProgress::new(),
                ready: AtomicBool::new(false),
                invalid: AtomicBool::new(false),
            });
            downstream.on_subscribe(Arc::clone(&state) as SubscriptionRef);
            state.downstream.set(downstream);
            state.ready.store(true, Ordering::Release);
            state.drain();
            for (index, source) in sources.iter().enumerate() {
                if state.downstream.is_done() || state.winner.load(Ordering::Acquire) != NO_WINNER
                {
                    break;
                }
                source.subscribe_raw(RaceSubscriber {
                    state: Arc::clone(&state),
                    index,
                    upstream: None,
                });
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{Recorder, ThreadScheduler};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_synchronous_source_wins() {
        let recorder = Recorder::unbounded();
        Flux::first([Flux::just([1, 2]), Flux::just([3, 4])]).subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![1, 2]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn losers_are_cancelled() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let recorder = Recorder::unbounded();
        Flux::first([
            Flux::<i32>::never().do_on_cancel(move || flag.store(true, Ordering::SeqCst)),
            Flux::just([9]),
        ])
        .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![9]);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn an_error_can_win() {
        let recorder = Recorder::unbounded();
        Flux::first([Flux::error(FluxError::message("first")), Flux::just([1])])
            .subscribe_raw(recorder.subscriber());
        assert!(recorder.values().is_empty());
        assert_eq!(recorder.error().unwrap().to_string(), "first");
    }

    #[test]
    fn winner_values_wait_for_downstream_demand() {
        let recorder = Recorder::with_demand(1);
        Flux::first([Flux::<i32>::never(), Flux::range(0, 3).map(|v| v as i32)])
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![0]);
        assert!(!recorder.is_terminated());
        recorder.request(2);
        assert_eq!(recorder.values(), vec![0, 1, 2]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn no_sources_completes() {
        let recorder = Recorder::<i32>::unbounded();
        Flux::first(Vec::new()).subscribe_raw(recorder.subscriber());
        assert!(recorder.is_completed());
    }

    #[test]
    fn timed_candidate_wins_without_downstream_demand() {
        let recorder = Recorder::with_demand(0);
        let ticks = Flux::interval(Duration::from_millis(5), ThreadScheduler::shared("race"));
        Flux::first([ticks.take(1), Flux::never()]).subscribe_raw(recorder.subscriber());
        thread::sleep(Duration::from_millis(50));
        assert!(recorder.values().is_empty());
        assert!(!recorder.is_terminated());
        recorder.request(1);
        assert!(recorder.await_terminal(Duration::from_secs(2)));
        assert_eq!(recorder.values(), vec![0]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn zero_request_fails_the_race() {
        let recorder = Recorder::with_demand(0);
        Flux::first([Flux::<i32>::never(), Flux::never()]).subscribe_raw(recorder.subscriber());
        recorder.request(0);
        assert!(matches!(recorder.error(), Some(FluxError::InvalidDemand(0))));
    }
}
