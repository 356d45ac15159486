//! Strategies and drivers for property tests over sequences.

use crate::lock;
use proptest::prelude::*;
use proptest::test_runner::Config;
use rill_core::{Flux, FluxError, Subscriber, SubscriptionRef};
use std::sync::{Arc, Mutex};

/// A proptest configuration running `cases` cases.
#[must_use]
pub fn proptest_config(cases: u32) -> Config {
    Config {
        cases,
        ..Config::default()
    }
}

/// Source values: up to `max_len` small integers.
pub fn arb_values(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(-1_000..1_000_i32, 0..=max_len)
}

/// A schedule of positive `request(n)` amounts.
pub fn arb_demand_schedule() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1..=8_u64, 1..=12)
}

/// Several independent sources of up to `max_len` values each.
pub fn arb_sources(max_sources: usize, max_len: usize) -> impl Strategy<Value = Vec<Vec<i32>>> {
    prop::collection::vec(arb_values(max_len), 1..=max_sources)
}

/// What a subscriber observed while demand was granted step by step.
#[derive(Debug, Clone)]
pub struct DemandTrace<T> {
    /// Values received, in order
    pub values: Vec<T>,
    /// `(total requested, total received)` after each request
    pub checkpoints: Vec<(u64, usize)>,
    /// Whether the sequence completed
    pub completed: bool,
    /// The error signal, if any
    pub error: Option<FluxError>,
}

impl<T> DemandTrace<T> {
    /// Whether the values never outran the granted demand.
    #[must_use]
    pub fn respects_demand(&self) -> bool {
        self.checkpoints
            .iter()
            .all(|&(requested, received)| received as u64 <= requested)
    }
}

struct Observed<T> {
    values: Vec<T>,
    completed: bool,
    error: Option<FluxError>,
}

struct TraceSubscriber<T> {
    observed: Arc<Mutex<Observed<T>>>,
    subscription: Arc<Mutex<Option<SubscriptionRef>>>,
}

impl<T: Send> Subscriber<T> for TraceSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        *lock(&self.subscription) = Some(subscription);
    }

    fn on_next(&mut self, value: T) {
        lock(&self.observed).values.push(value);
    }

    fn on_error(&mut self, error: FluxError) {
        lock(&self.observed).error = Some(error);
    }

    fn on_complete(&mut self) {
        lock(&self.observed).completed = true;
    }
}

/// Subscribe to a synchronous `flux` and grant demand per `schedule`.
///
/// Only meaningful for sequences that emit on the requesting thread.
pub fn drive_with_demand<T: Clone + Send + 'static>(
    flux: &Flux<T>,
    schedule: &[u64],
) -> DemandTrace<T> {
    let observed = Arc::new(Mutex::new(Observed {
        values: Vec::new(),
        completed: false,
        error: None,
    }));
    let subscription = Arc::new(Mutex::new(None));
    flux.subscribe_with(TraceSubscriber {
        observed: Arc::clone(&observed),
        subscription: Arc::clone(&subscription),
    });

    let mut checkpoints = Vec::with_capacity(schedule.len());
    let mut requested = 0_u64;
    for &n in schedule {
        let current = lock(&subscription).clone();
        if let Some(current) = current {
            current.request(n);
        }
        requested = requested.saturating_add(n);
        checkpoints.push((requested, lock(&observed).values.len()));
    }

    let observed = lock(&observed);
    DemandTrace {
        values: observed.values.clone(),
        checkpoints,
        completed: observed.completed,
        error: observed.error.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(proptest_config(64))]

        #[test]
        fn iterables_respect_demand(values in arb_values(40), schedule in arb_demand_schedule()) {
            let trace = drive_with_demand(&Flux::from_iter(values.clone()), &schedule);
            prop_assert!(trace.respects_demand());
            let granted: u64 = schedule.iter().sum();
            let expected = values.len().min(usize::try_from(granted).unwrap());
            prop_assert_eq!(trace.values.as_slice(), &values[..expected]);
        }
    }
}
