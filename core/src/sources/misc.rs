//! Sources that never emit values, and lazy construction.

use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, NoopSubscription, Subscription, SubscriptionRef};
use crate::sync::lock;
use std::sync::{Arc, Mutex};

struct NeverSubscription<T> {
    subscriber: Mutex<Option<BoxSubscriber<T>>>,
}

impl<T: Send> Subscription for NeverSubscription<T> {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {
        let subscriber = lock(&self.subscriber).take();
        drop(subscriber);
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Signal `error` immediately, without emitting values.
    #[must_use]
    pub fn error(error: FluxError) -> Self {
        Self::from_fn(move |mut subscriber| {
            subscriber.on_subscribe(NoopSubscription::shared());
            subscriber.on_error(error.clone());
        })
    }

    /// Never signal anything besides the subscription.
    ///
    /// The subscriber stays referenced until it cancels.
    #[must_use]
    pub fn never() -> Self {
        Self::from_fn(|mut subscriber| {
            let subscription = Arc::new(NeverSubscription {
                subscriber: Mutex::new(None),
            });
            subscriber.on_subscribe(Arc::clone(&subscription) as SubscriptionRef);
            *lock(&subscription.subscriber) = Some(subscriber);
        })
    }

    /// Build a fresh sequence for every subscription.
    ///
    /// A panicking factory is reported as an error signal.
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::from_fn(move |mut subscriber| match guard(&factory) {
            Ok(flux) => flux.subscribe_raw(subscriber),
            Err(error) => {
                subscriber.on_subscribe(NoopSubscription::shared());
                subscriber.on_error(error);
            }
        })
    }
}
