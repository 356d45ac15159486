//! Positional combination of several sequences.

use crate::demand::{Demand, StageLifecycle, WorkInProgress};
use crate::error::FluxError;
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, Subscriber, Subscription, SubscriptionRef};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Values requested ahead from each source.
const ZIP_PREFETCH: u64 = 32;

struct ZipState<T> {
    downstream: Mutex<Option<BoxSubscriber<Vec<T>>>>,
    lifecycle: StageLifecycle,
    demand: Demand,
    wip: WorkInProgress,
    buffers: Mutex<Vec<VecDeque<T>>>,
    finished: Vec<AtomicBool>,
    subscriptions: Mutex<Vec<Option<SubscriptionRef>>>,
    error: Mutex<Option<FluxError>>,
    cancelled: AtomicBool,
    invalid: AtomicBool,
}

enum Exit {
    Continue,
    Stop,
}

impl<T: Send + 'static> ZipState<T> {
    fn new(arity: usize) -> Self {
        Self {
            downstream: Mutex::new(None),
            lifecycle: StageLifecycle::new(),
            demand: Demand::new(),
            wip: WorkInProgress::new(),
            buffers: Mutex::new((0..arity).map(|_| VecDeque::new()).collect()),
            finished: (0..arity).map(|_| AtomicBool::new(false)).collect(),
            subscriptions: Mutex::new(vec![None; arity]),
            error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
        }
    }

    fn cancel_sources(&self) {
        let subscriptions: Vec<SubscriptionRef> =
            lock(&self.subscriptions).iter_mut().filter_map(Option::take).collect();
        for subscription in subscriptions {
            subscription.cancel();
        }
    }

    fn fail(&self, error: FluxError) {
        {
            let mut slot = lock(&self.error);
            if slot.is_some() || self.lifecycle.is_terminated() {
                return;
            }
            *slot = Some(error);
        }
        self.cancel_sources();
        self.drain();
    }

    /// Pop one value from every buffer, if each has one.
    fn next_row(&self) -> Option<Vec<T>> {
        let mut buffers = lock(&self.buffers);
        if buffers.iter().any(VecDeque::is_empty) {
            return None;
        }
        buffers.iter_mut().map(VecDeque::pop_front).collect()
    }

    fn replenish(&self) {
        let subscriptions: Vec<SubscriptionRef> =
            lock(&self.subscriptions).iter().flatten().cloned().collect();
        for subscription in subscriptions {
            subscription.request(1);
        }
    }

    /// A source that finished with nothing buffered can never pair again.
    fn exhausted(&self) -> bool {
        let buffers = lock(&self.buffers);
        self.finished
            .iter()
            .zip(buffers.iter())
            .any(|(finished, buffer)| finished.load(Ordering::Acquire) && buffer.is_empty())
    }

    fn drain(&self) {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            if let Exit::Stop = self.drain_pass() {
                return;
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    fn drain_pass(&self) -> Exit {
        let mut slot = lock(&self.downstream);
        let Some(downstream) = slot.as_mut() else {
            return Exit::Continue;
        };
        if self.cancelled.load(Ordering::Acquire) {
            lock(&self.buffers).iter_mut().for_each(VecDeque::clear);
            slot.take();
            return Exit::Stop;
        }
        if self.invalid.swap(false, Ordering::AcqRel) {
            drop(slot);
            self.fail(FluxError::InvalidDemand(0));
            return Exit::Continue;
        }

        let requested = self.demand.get();
        let mut emitted = 0;
        while emitted < requested {
            if self.cancelled.load(Ordering::Acquire) || lock(&self.error).is_some() {
                break;
            }
            let Some(row) = self.next_row() else {
                break;
            };
            downstream.on_next(row);
            emitted += 1;
            self.replenish();
        }
        self.demand.produced(emitted);

        if self.cancelled.load(Ordering::Acquire) {
            return Exit::Continue;
        }
        let error = lock(&self.error).take();
        if let Some(error) = error {
            self.lifecycle.terminate();
            let finished = slot.take();
            drop(slot);
            if let Some(mut downstream) = finished {
                downstream.on_error(error);
            }
            return Exit::Stop;
        }
        if self.exhausted() {
            if self.lifecycle.terminate() {
                let finished = slot.take();
                drop(slot);
                self.cancel_sources();
                if let Some(mut downstream) = finished {
                    downstream.on_complete();
                }
            }
            return Exit::Stop;
        }
        if self.finished.iter().any(|f| f.load(Ordering::Acquire)) {
            self.lifecycle.begin_draining();
        }
        Exit::Continue
    }
}

impl<T: Send + 'static> Subscription for ZipState<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.invalid.store(true, Ordering::Release);
        } else {
            self.demand.add(n);
        }
        self.drain();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifecycle.terminate();
        self.cancel_sources();
        self.drain();
    }
}

struct ZipSubscriber<T> {
    state: Arc<ZipState<T>>,
    index: usize,
}

impl<T: Send + 'static> Subscriber<T> for ZipSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.state.lifecycle.is_terminated() {
            subscription.cancel();
            return;
        }
        lock(&self.state.subscriptions)[self.index] = Some(Arc::clone(&subscription));
        subscription.request(ZIP_PREFETCH);
    }

    fn on_next(&mut self, value: T) {
        lock(&self.state.buffers)[self.index].push_back(value);
        self.state.drain();
    }

    fn on_error(&mut self, error: FluxError) {
        self.state.fail(error);
    }

    fn on_complete(&mut self) {
        self.state.finished[self.index].store(true, Ordering::Release);
        self.state.drain();
    }
}

impl<T: Send + 'static> Flux<Vec<T>> {
    /// Combine sources positionally: the `j`-th row holds the `j`-th value of
    /// every source, in source order.
    ///
    /// Early values are buffered per source. The result completes as soon as
    /// one source completed and has no buffered value left to pair, cancelling
    /// the other sources. The first error terminates the result and cancels
    /// every source.
    pub fn zip_all(sources: impl IntoIterator<Item = Flux<T>>) -> Self {
        let sources: Vec<Flux<T>> = sources.into_iter().collect();
        if sources.is_empty() {
            return Self::empty();
        }
        Self::from_fn(move |mut downstream| {
            let state = Arc::new(ZipState::new(sources.len()));
            state.lifecycle.activate();
            downstream.on_subscribe(Arc::clone(&state) as SubscriptionRef);
            *lock(&state.downstream) = Some(downstream);
            for (index, source) in sources.iter().enumerate() {
                if state.lifecycle.is_terminated() {
                    break;
                }
                source.subscribe_raw(ZipSubscriber {
                    state: Arc::clone(&state),
                    index,
                });
            }
            state.drain();
        })
    }
}

/// Lets sources of different types share one zip stage.
enum Slot<A, B, C> {
    A(A),
    B(B),
    C(C),
}

fn shape_error() -> FluxError {
    FluxError::ProtocolViolation("zip produced a row of unexpected shape".to_string())
}

impl<A: Send + 'static, B: Send + 'static> Flux<(A, B)> {
    /// Pair the values of two sequences positionally.
    pub fn zip(first: Flux<A>, second: Flux<B>) -> Self {
        Flux::zip_all([
            first.map(Slot::<A, B, ()>::A),
            second.map(Slot::<A, B, ()>::B),
        ])
        .transform(Arc::new(|row: Vec<Slot<A, B, ()>>| {
            let mut row = row.into_iter();
            match (row.next(), row.next()) {
                (Some(Slot::A(a)), Some(Slot::B(b))) => Ok(Some((a, b))),
                _ => Err(shape_error()),
            }
        }))
    }
}

impl<A: Send + 'static, B: Send + 'static, C: Send + 'static> Flux<(A, B, C)> {
    /// Combine the values of three sequences positionally.
    pub fn zip3(first: Flux<A>, second: Flux<B>, third: Flux<C>) -> Self {
        Flux::zip_all([
            first.map(Slot::<A, B, C>::A),
            second.map(Slot::<A, B, C>::B),
            third.map(Slot::<A, B, C>::C),
        ])
        .transform(Arc::new(|row: Vec<Slot<A, B, C>>| {
            let mut row = row.into_iter();
            match (row.next(), row.next(), row.next()) {
                (Some(Slot::A(a)), Some(Slot::B(b)), Some(Slot::C(c))) => Ok(Some((a, b, c))),
                _ => Err(shape_error()),
            }
        }))
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Pair the values of `self` and `other` positionally.
    pub fn zip_with<U: Send + 'static>(self, other: Flux<U>) -> Flux<(T, U)> {
        Flux::zip(self, other)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;

    #[test]
    fn zips_positionally() {
        let recorder = Recorder::unbounded();
        Flux::zip(Flux::just([1, 2, 3]), Flux::just(["a", "b"]))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![(1, "a"), (2, "b")]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn zip3_emits_the_minimum_count() {
        let recorder = Recorder::unbounded();
        Flux::zip3(Flux::range(0, 5), Flux::range(10, 3), Flux::range(20, 4))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(
            recorder.values(),
            vec![(0, 10, 20), (1, 11, 21), (2, 12, 22)]
        );
        assert!(recorder.is_completed());
    }

    #[test]
    fn zip_all_respects_demand() {
        let recorder = Recorder::with_demand(1);
        Flux::zip_all([Flux::range(0, 3), Flux::range(3, 3)]).subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![vec![0, 3]]);
        recorder.request(5);
        assert_eq!(recorder.values(), vec![vec![0, 3], vec![1, 4], vec![2, 5]]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn error_cancels_other_sources() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let recorder = Recorder::unbounded();
        Flux::zip(
            Flux::<i32>::never().do_on_cancel(move || flag.store(true, Ordering::SeqCst)),
            Flux::<i32>::error(FluxError::message("broken")),
        )
        .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.error().unwrap().to_string(), "broken");
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_source_completes_the_zip() {
        let recorder = Recorder::unbounded();
        Flux::zip(Flux::<i32>::never(), Flux::<i32>::empty()).subscribe_raw(recorder.subscriber());
        assert!(recorder.is_completed());
    }
}
