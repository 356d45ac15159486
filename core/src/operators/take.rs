//! Bounded prefix of a sequence.

use crate::error::FluxError;
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, NoopSubscription, Subscriber, Subscription, SubscriptionRef};
use crate::sync::lock;
use std::sync::{Arc, Mutex};

/// Caps the cumulative upstream demand at the take limit.
struct TakeSubscription {
    upstream: SubscriptionRef,
    remaining: Mutex<u64>,
}

impl Subscription for TakeSubscription {
    fn request(&self, n: u64) {
        if n == 0 {
            self.upstream.request(0);
            return;
        }
        let granted = {
            let mut remaining = lock(&self.remaining);
            let granted = n.min(*remaining);
            *remaining -= granted;
            granted
        };
        if granted > 0 {
            self.upstream.request(granted);
        }
    }

    fn cancel(&self) {
        self.upstream.cancel();
    }
}

struct TakeSubscriber<T> {
    downstream: BoxSubscriber<T>,
    limit: u64,
    delivered: u64,
    upstream: Option<SubscriptionRef>,
    done: bool,
}

impl<T: Send> Subscriber<T> for TakeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.limit == 0 {
            subscription.cancel();
            self.done = true;
            self.downstream.on_subscribe(NoopSubscription::shared());
            self.downstream.on_complete();
            return;
        }
        self.upstream = Some(Arc::clone(&subscription));
        let capped: SubscriptionRef = Arc::new(TakeSubscription {
            upstream: subscription,
            remaining: Mutex::new(self.limit),
        });
        self.downstream.on_subscribe(capped);
    }

    fn on_next(&mut self, value: T) {
        if self.done {
            return;
        }
        self.delivered += 1;
        self.downstream.on_next(value);
        if self.delivered == self.limit {
            self.done = true;
            if let Some(upstream) = &self.upstream {
                upstream.cancel();
            }
            self.downstream.on_complete();
        }
    }

    fn on_error(&mut self, error: FluxError) {
        if !self.done {
            self.done = true;
            self.downstream.on_error(error);
        }
    }

    fn on_complete(&mut self) {
        if !self.done {
            self.done = true;
            self.downstream.on_complete();
        }
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Emit at most the first `n` values, then complete.
    ///
    /// Upstream is asked for no more than `n` values in total. After the
    /// `n`-th value is delivered, upstream is cancelled before the downstream
    /// completion signal, so upstream resources are released first.
    #[must_use]
    pub fn take(self, n: u64) -> Self {
        Self::from_fn(move |downstream| {
            self.subscribe_raw(TakeSubscriber {
                downstream,
                limit: n,
                delivered: 0,
                upstream: None,
                done: false,
            });
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn take_limits_values_and_completes() {
        let recorder = Recorder::unbounded();
        Flux::range(0, 100).take(3).subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![0, 1, 2]);
        assert!(recorder.is_completed());
    }

    #[test]
    fn take_caps_upstream_demand() {
        let requested = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&requested);
        let recorder = Recorder::unbounded();
        Flux::range(0, 100)
            .do_on_request(move |n| {
                seen.fetch_add(n.min(1_000), Ordering::SeqCst);
            })
            .take(4)
            .subscribe_raw(recorder.subscriber());
        assert_eq!(requested.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn upstream_is_cancelled_before_completion() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let on_cancel = Arc::clone(&order);
        let recorder = Recorder::unbounded();
        let on_complete = Arc::clone(&order);
        Flux::range(0, 10)
            .do_on_cancel(move || on_cancel.lock().unwrap().push("cancel"))
            .take(2)
            .do_on_complete(move || on_complete.lock().unwrap().push("complete"))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(*order.lock().unwrap(), vec!["cancel", "complete"]);
    }

    #[test]
    fn take_zero_completes_immediately() {
        let recorder = Recorder::<i64>::unbounded();
        Flux::range(0, 10).take(0).subscribe_raw(recorder.subscriber());
        assert!(recorder.values().is_empty());
        assert!(recorder.is_completed());
    }

    #[test]
    fn shorter_source_completes_normally() {
        let recorder = Recorder::unbounded();
        Flux::range(0, 2).take(5).subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![0, 1]);
        assert!(recorder.is_completed());
    }
}
