//! Operators that consume the whole sequence before producing their result.

use super::{Downstream, SubscriptionArbiter};
use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::mono::Mono;
use crate::protocol::{Subscriber, Subscription, SubscriptionRef, UNBOUNDED};
use crate::scheduler::SchedulerRef;
use crate::sources::iter::IterSubscription;
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Step<A, T> = Arc<dyn Fn(A, T) -> A + Send + Sync>;
type Finish<A, R> = Arc<dyn Fn(A) -> Option<R> + Send + Sync>;

/// Shared by the accumulating subscriber and the result emission.
///
/// Downstream demand is parked in the arbiter until the result exists; the
/// upstream itself is always drained with unbounded demand.
struct AggregateState<R> {
    arbiter: SubscriptionArbiter,
    downstream: Downstream<R>,
    upstream: Mutex<Option<SubscriptionRef>>,
}

impl<R: Send + 'static> Subscription for AggregateState<R> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        if self.downstream.cancel() {
            self.arbiter.cancel();
            let upstream = lock(&self.upstream).take();
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
        }
    }
}

struct AggregateSubscriber<T, A, R> {
    state: Arc<AggregateState<R>>,
    accumulator: Option<A>,
    step: Step<A, T>,
    finish: Finish<A, R>,
}

impl<T, A, R> AggregateSubscriber<T, A, R>
where
    T: Send + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    fn abort(&mut self, error: FluxError) {
        self.accumulator = None;
        let upstream = lock(&self.state.upstream).take();
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.state.downstream.error(error);
    }
}

impl<T, A, R> Subscriber<T> for AggregateSubscriber<T, A, R>
where
    T: Send + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.state.downstream.is_done() {
            subscription.cancel();
            return;
        }
        *lock(&self.state.upstream) = Some(Arc::clone(&subscription));
        subscription.request(UNBOUNDED);
    }

    fn on_next(&mut self, value: T) {
        let Some(accumulator) = self.accumulator.take() else {
            return;
        };
        let step = &self.step;
        match guard(|| step(accumulator, value)) {
            Ok(next) => self.accumulator = Some(next),
            Err(error) => self.abort(error),
        }
    }

    fn on_error(&mut self, error: FluxError) {
        self.accumulator = None;
        self.state.downstream.error(error);
    }

    fn on_complete(&mut self) {
        lock(&self.state.upstream).take();
        let Some(accumulator) = self.accumulator.take() else {
            return;
        };
        let finish = &self.finish;
        match guard(|| finish(accumulator)) {
            Ok(Some(result)) => IterSubscription::start(
                Box::new(std::iter::once(result)),
                Box::new(ResultSubscriber {
                    state: Arc::clone(&self.state),
                }),
            ),
            Ok(None) => {
                self.state.downstream.complete();
            }
            Err(error) => {
                self.state.downstream.error(error);
            }
        }
    }
}

/// Delivers the single result once downstream demand allows it.
struct ResultSubscriber<R> {
    state: Arc<AggregateState<R>>,
}

impl<R: Send + 'static> Subscriber<R> for ResultSubscriber<R> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.state.arbiter.set(subscription);
    }

    fn on_next(&mut self, value: R) {
        self.state.downstream.next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        self.state.downstream.error(error);
    }

    fn on_complete(&mut self) {
        self.state.downstream.complete();
    }
}

impl<T: Send + 'static> Flux<T> {
    fn aggregate<A, R>(
        self,
        init: impl Fn() -> A + Send + Sync + 'static,
        step: Step<A, T>,
        finish: Finish<A, R>,
    ) -> Flux<R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        Flux::from_fn(move |mut downstream| {
            let state = Arc::new(AggregateState {
                arbiter: SubscriptionArbiter::new(),
                downstream: Downstream::new(),
                upstream: Mutex::new(None),
            });
            downstream.on_subscribe(Arc::clone(&state) as SubscriptionRef);
            state.downstream.set(downstream);
            self.subscribe_raw(AggregateSubscriber {
                state,
                accumulator: Some(init()),
                step: Arc::clone(&step),
                finish: Arc::clone(&finish),
            });
        })
    }

    /// Drop every value, keeping only the terminal signal.
    #[must_use]
    pub fn ignore_elements(self) -> Self {
        self.aggregate(|| (), Arc::new(|(), _| ()), Arc::new(|()| None))
    }

    /// Complete when `self` completes, discarding its values.
    pub fn then(self) -> Mono<()> {
        Mono::from_flux_unchecked(self.aggregate(
            || (),
            Arc::new(|(), _| ()),
            Arc::new(|()| None::<()>),
        ))
    }

    /// Combine all values pairwise with `reducer`.
    ///
    /// An empty sequence produces an empty `Mono`.
    pub fn reduce<F>(self, reducer: F) -> Mono<T>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        Mono::from_flux_unchecked(self.aggregate(
            || None,
            Arc::new(move |accumulator: Option<T>, value| {
                Some(match accumulator {
                    Some(accumulator) => reducer(accumulator, value),
                    None => value,
                })
            }),
            Arc::new(|accumulator| accumulator),
        ))
    }

    /// Number of values emitted before completion.
    pub fn count(self) -> Mono<u64> {
        Mono::from_flux_unchecked(self.aggregate(
            || 0_u64,
            Arc::new(|count: u64, _: T| count + 1),
            Arc::new(Some),
        ))
    }

    /// All values, in order, as one list.
    pub fn collect_list(self) -> Mono<Vec<T>> {
        Mono::from_flux_unchecked(self.aggregate(
            Vec::new,
            Arc::new(|mut values: Vec<T>, value| {
                values.push(value);
                values
            }),
            Arc::new(Some),
        ))
    }

    /// The first value, cancelling the rest of the sequence.
    pub fn next(self) -> Mono<T> {
        Mono::from_flux_unchecked(self.take(1))
    }

    /// Shift every value by `delay`, measured on `scheduler`.
    ///
    /// Values are delayed one after the other, so the gap between two
    /// consecutive values is at least `delay`.
    #[must_use]
    pub fn delay_elements(self, delay: Duration, scheduler: SchedulerRef) -> Self {
        self.concat_map(move |value| {
            let value = Mutex::new(Some(value));
            Mono::delay(delay, Arc::clone(&scheduler))
                .into_flux()
                .transform(Arc::new(move |_| Ok::<_, FluxError>(lock(&value).take())))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::scheduler::immediate;
    use crate::test_support::Recorder;
    use std::time::Instant;

    #[test]
    fn then_keeps_only_completion() {
        let recorder = Recorder::unbounded();
        Flux::just([1, 2, 3]).then().subscribe_raw(recorder.subscriber());
        assert!(recorder.values().is_empty());
        assert!(recorder.is_completed());
    }

    #[test]
    fn ignore_elements_forwards_errors() {
        let recorder = Recorder::unbounded();
        Flux::just([1])
            .concat_with(Flux::error(FluxError::message("boom")))
            .ignore_elements()
            .subscribe_raw(recorder.subscriber());
        assert!(recorder.values().is_empty());
        assert_eq!(recorder.error().unwrap().to_string(), "boom");
    }

    #[test]
    fn reduce_and_count() {
        let sum = Recorder::unbounded();
        Flux::range(1, 4).reduce(|a, b| a + b).subscribe_raw(sum.subscriber());
        assert_eq!(sum.values(), vec![10]);

        let count = Recorder::unbounded();
        Flux::range(1, 4).count().subscribe_raw(count.subscriber());
        assert_eq!(count.values(), vec![4]);
    }

    #[test]
    fn reduce_of_empty_is_empty() {
        let recorder = Recorder::unbounded();
        Flux::<i32>::empty()
            .reduce(|a, b| a + b)
            .subscribe_raw(recorder.subscriber());
        assert!(recorder.values().is_empty());
        assert!(recorder.is_completed());
    }

    #[test]
    fn result_waits_for_demand() {
        let recorder = Recorder::with_demand(0);
        Flux::just(["a", "b"])
            .collect_list()
            .subscribe_raw(recorder.subscriber());
        assert!(recorder.values().is_empty());
        assert!(!recorder.is_terminated());
        recorder.request(1);
        assert_eq!(recorder.values(), vec![vec!["a", "b"]]);
        assert!(recorder.is_completed());
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_reducer_becomes_an_error() {
        let recorder = Recorder::unbounded();
        Flux::range(0, 3)
            .reduce(|_, _| panic!("bad reducer"))
            .subscribe_raw(recorder.subscriber());
        assert!(recorder.error().unwrap().to_string().contains("bad reducer"));
    }

    #[test]
    fn next_takes_the_first_value() {
        let recorder = Recorder::unbounded();
        Flux::range(5, 10).next().subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![5]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn delay_elements_spaces_values() {
        let start = Instant::now();
        let recorder = Recorder::unbounded();
        Flux::just(["x", "y"])
            .delay_elements(Duration::from_millis(10), immediate())
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec!["x", "y"]);
        assert!(recorder.is_completed());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
