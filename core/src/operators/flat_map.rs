//! Asynchronous one-to-many transform and merging.

use crate::config::{Concurrency, FlatMapConfig};
use crate::demand::{Demand, StageLifecycle, WorkInProgress};
use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, Subscriber, Subscription, SubscriptionRef};
use crate::sync::lock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Mapper<T, U> = Arc<dyn Fn(T) -> Flux<U> + Send + Sync>;

/// Per-subscription state of a `flat_map` stage.
///
/// Inner values are queued with the id of the inner that produced them, so a
/// consumed value can be replenished from the same inner. The drain loop is
/// the only place that emits downstream.
struct FlatMapState<T, U> {
    mapper: Mapper<T, U>,
    config: FlatMapConfig,
    lifecycle: StageLifecycle,
    downstream: Mutex<Option<BoxSubscriber<U>>>,
    demand: Demand,
    wip: WorkInProgress,
    queue: Mutex<VecDeque<(u64, U)>>,
    inners: Mutex<HashMap<u64, Option<SubscriptionRef>>>,
    active: AtomicUsize,
    next_id: AtomicU64,
    outer: Mutex<Option<SubscriptionRef>>,
    outer_done: AtomicBool,
    error: Mutex<Option<FluxError>>,
    cancelled: AtomicBool,
    invalid: AtomicBool,
}

enum Exit {
    Continue,
    Stop,
}

impl<T: Send + 'static, U: Send + 'static> FlatMapState<T, U> {
    fn new(mapper: Mapper<T, U>, config: FlatMapConfig) -> Self {
        Self {
            mapper,
            config,
            lifecycle: StageLifecycle::new(),
            downstream: Mutex::new(None),
            demand: Demand::new(),
            wip: WorkInProgress::new(),
            queue: Mutex::new(VecDeque::new()),
            inners: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            outer: Mutex::new(None),
            outer_done: AtomicBool::new(false),
            error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
        }
    }

    /// Cancel the outer source and every active inner.
    fn cancel_sources(&self) {
        let outer = lock(&self.outer).take();
        if let Some(outer) = outer {
            outer.cancel();
        }
        let inners: Vec<SubscriptionRef> = lock(&self.inners)
            .drain()
            .filter_map(|(_, subscription)| subscription)
            .collect();
        tracing::trace!(inners = inners.len(), "Cancelling flat_map sources");
        for inner in inners {
            inner.cancel();
        }
    }

    /// Record the first error and stop every source.
    fn fail(&self, error: FluxError) {
        {
            let mut slot = lock(&self.error);
            if slot.is_some() || self.lifecycle.is_terminated() {
                tracing::trace!(error = %error, "Discarding secondary flat_map error");
                return;
            }
            *slot = Some(error);
        }
        self.cancel_sources();
        self.drain();
    }

    fn subscribe_inner(self: &Arc<Self>, value: T) {
        let mapper = &self.mapper;
        match guard(|| mapper(value)) {
            Ok(inner) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.active.fetch_add(1, Ordering::AcqRel);
                lock(&self.inners).insert(id, None);
                inner.subscribe_raw(InnerSubscriber {
                    state: Arc::clone(self),
                    id,
                });
            }
            Err(error) => self.fail(error),
        }
    }

    fn inner_done(&self, id: u64) {
        lock(&self.inners).remove(&id);
        self.active.fetch_sub(1, Ordering::AcqRel);
        if matches!(self.config.concurrency, Concurrency::Bounded(_))
            && !self.outer_done.load(Ordering::Acquire)
        {
            let outer = lock(&self.outer).clone();
            if let Some(outer) = outer {
                outer.request(1);
            }
        }
        self.drain();
    }

    fn replenish(&self, id: u64) {
        let inner = lock(&self.inners).get(&id).cloned().flatten();
        if let Some(inner) = inner {
            inner.request(1);
        }
    }

    fn is_finished(&self) -> bool {
        self.outer_done.load(Ordering::Acquire)
            && self.active.load(Ordering::Acquire) == 0
            && lock(&self.queue).is_empty()
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
            lock(&self.queue).clear();
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
            let item = lock(&self.queue).pop_front();
            let Some((id, value)) = item else {
                break;
            };
            downstream.on_next(value);
            emitted += 1;
            self.replenish(id);
        }
        self.demand.produced(emitted);

        if self.cancelled.load(Ordering::Acquire) {
            return Exit::Continue;
        }
        let error = lock(&self.error).take();
        if let Some(error) = error {
            self.lifecycle.terminate();
            lock(&self.queue).clear();
            let finished = slot.take();
            drop(slot);
            if let Some(mut downstream) = finished {
                downstream.on_error(error);
            }
            return Exit::Stop;
        }
        if self.is_finished() && self.lifecycle.terminate() {
            let finished = slot.take();
            drop(slot);
            if let Some(mut downstream) = finished {
                downstream.on_complete();
            }
            return Exit::Stop;
        }
        Exit::Continue
    }
}

impl<T: Send + 'static, U: Send + 'static> Subscription for FlatMapState<T, U> {
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

struct OuterSubscriber<T, U> {
    state: Arc<FlatMapState<T, U>>,
}

impl<T: Send + 'static, U: Send + 'static> Subscriber<T> for OuterSubscriber<T, U> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.state.lifecycle.is_terminated() {
            subscription.cancel();
            return;
        }
        *lock(&self.state.outer) = Some(Arc::clone(&subscription));
        subscription.request(self.state.config.concurrency.upstream_demand());
    }

    fn on_next(&mut self, value: T) {
        if self.state.lifecycle.is_terminated() {
            return;
        }
        self.state.subscribe_inner(value);
    }

    fn on_error(&mut self, error: FluxError) {
        lock(&self.state.outer).take();
        self.state.fail(error);
    }

    fn on_complete(&mut self) {
        lock(&self.state.outer).take();
        self.state.outer_done.store(true, Ordering::Release);
        self.state.drain();
    }
}

struct InnerSubscriber<T, U> {
    state: Arc<FlatMapState<T, U>>,
    id: u64,
}

impl<T: Send + 'static, U: Send + 'static> Subscriber<U> for InnerSubscriber<T, U> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        {
            let mut inners = lock(&self.state.inners);
            match inners.get_mut(&self.id) {
                Some(slot) if !self.state.lifecycle.is_terminated() => {
                    *slot = Some(Arc::clone(&subscription));
                }
                _ => {
                    drop(inners);
                    subscription.cancel();
                    return;
                }
            }
        }
        subscription.request(self.state.config.prefetch);
    }

    fn on_next(&mut self, value: U) {
        lock(&self.state.queue).push_back((self.id, value));
        self.state.drain();
    }

    fn on_error(&mut self, error: FluxError) {
        lock(&self.state.inners).remove(&self.id);
        self.state.fail(error);
    }

    fn on_complete(&mut self) {
        self.state.inner_done(self.id);
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Map every value to an inner sequence and merge the inner values.
    ///
    /// Inner values interleave in arrival order. The result completes once
    /// `self` and every inner sequence completed. The first error from any
    /// of them terminates the result and cancels every other source.
    pub fn flat_map<U, F>(self, mapper: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        self.flat_map_with(mapper, FlatMapConfig::default())
    }

    /// [`flat_map`](Self::flat_map) with explicit concurrency and prefetch.
    ///
    /// With [`Concurrency::Bounded`], at most that many inner sequences are
    /// subscribed at once and `self` is only asked for a replacement value
    /// when an inner completes.
    pub fn flat_map_with<U, F>(self, mapper: F, config: FlatMapConfig) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        let mapper: Mapper<T, U> = Arc::new(mapper);
        Flux::from_fn(move |mut downstream| {
            let state = Arc::new(FlatMapState::new(Arc::clone(&mapper), config));
            state.lifecycle.activate();
            downstream.on_subscribe(Arc::clone(&state) as SubscriptionRef);
            *lock(&state.downstream) = Some(downstream);
            self.subscribe_raw(OuterSubscriber {
                state: Arc::clone(&state),
            });
            state.drain();
        })
    }

    /// Map every value to an inner sequence, subscribing to one inner at a
    /// time so inner values keep the order of `self`.
    pub fn concat_map<U, F>(self, mapper: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        self.flat_map_with(
            mapper,
            FlatMapConfig::default().with_concurrency(Concurrency::Bounded(1)),
        )
    }

    /// Merge the values of every source as they arrive.
    ///
    /// Completes when all sources completed; the first error cancels the
    /// others.
    pub fn merge(sources: impl IntoIterator<Item = Self>) -> Self {
        let sources: Vec<Self> = sources.into_iter().collect();
        Flux::from_iter(sources).flat_map(|source| source)
    }

    /// Merge the values of `self` and `other` as they arrive.
    #[must_use]
    pub fn merge_with(self, other: Self) -> Self {
        Self::merge([self, other])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;

    #[test]
    fn flat_map_merges_inner_values() {
        let recorder = Recorder::unbounded();
        Flux::just([1, 2, 3])
            .flat_map(|v| Flux::just([v * 10, v * 10 + 1]))
            .subscribe_raw(recorder.subscriber());
        let mut values = recorder.values();
        values.sort_unstable();
        assert_eq!(values, vec![10, 11, 20, 21, 30, 31]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn completion_waits_for_active_inners() {
        let recorder = Recorder::unbounded();
        Flux::just([1])
            .flat_map(|_| Flux::<i32>::never())
            .subscribe_raw(recorder.subscriber());
        assert!(!recorder.is_terminated());
    }

    #[test]
    fn inner_error_cancels_siblings() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let recorder = Recorder::<i32>::unbounded();
        Flux::just([0, 1])
            .flat_map(move |v| {
                if v == 0 {
                    let flag = Arc::clone(&flag);
                    Flux::never().do_on_cancel(move || flag.store(true, Ordering::SeqCst))
                } else {
                    Flux::error(FluxError::message("inner failed"))
                }
            })
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.error().unwrap().to_string(), "inner failed");
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn respects_downstream_demand() {
        let recorder = Recorder::with_demand(3);
        Flux::range(0, 4)
            .flat_map(|v| Flux::just([v, v]))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values().len(), 3);
        recorder.request(100);
        assert_eq!(recorder.values().len(), 8);
        assert!(recorder.is_completed());
    }

    #[test]
    fn bounded_concurrency_limits_active_inners() {
        let subscribed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&subscribed);
        let recorder = Recorder::<i64>::unbounded();
        Flux::range(0, 10)
            .flat_map_with(
                move |_| {
                    let counter = Arc::clone(&counter);
                    Flux::never().do_on_subscribe(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                },
                FlatMapConfig::default().with_concurrency(Concurrency::Bounded(2)),
            )
            .subscribe_raw(recorder.subscriber());
        assert_eq!(subscribed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concat_map_keeps_order() {
        let recorder = Recorder::unbounded();
        Flux::just([3, 1, 2])
            .concat_map(|v| Flux::range(0, v).map(move |i| (v, i)))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(
            recorder.values(),
            vec![(3, 0), (3, 1), (3, 2), (1, 0), (2, 0), (2, 1)]
        );
    }

    #[test]
    fn mapper_panic_becomes_error() {
        let recorder = Recorder::<i32>::unbounded();
        Flux::just([1])
            .flat_map(|_: i32| -> Flux<i32> { std::panic::panic_any("mapper exploded") })
            .subscribe_raw(recorder.subscriber());
        assert!(recorder.error().unwrap().is::<crate::TransformPanicked>());
    }

    #[test]
    fn merge_combines_all_sources() {
        let recorder = Recorder::unbounded();
        Flux::merge([Flux::just([1, 2]), Flux::just([3]), Flux::empty()])
            .subscribe_raw(recorder.subscriber());
        let mut values = recorder.values();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(recorder.is_completed());
    }
}
