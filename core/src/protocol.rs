//! Publisher, subscriber and subscription contracts.
//!
//! The protocol has three roles:
//!
//! - A [`Publisher`] describes how to produce signals. Each call to
//!   [`Publisher::subscribe`] starts one independent execution.
//! - A [`Subscriber`] consumes the signals of one execution.
//! - A [`Subscription`] is the demand channel of one execution. The publisher
//!   hands it to the subscriber through [`Subscriber::on_subscribe`] before any
//!   other signal.
//!
//! A publisher never emits more `on_next` signals than the cumulative demand
//! granted through [`Subscription::request`]. Terminal signals need no demand,
//! and at most one of them is ever delivered.

use crate::error::FluxError;
use std::sync::Arc;

/// Demand sentinel meaning "no limit".
///
/// Demand saturates at this value and stays there.
pub const UNBOUNDED: u64 = u64::MAX;

/// Demand-control channel between one producer and one consumer.
///
/// Implementations must be safe to call from any thread and from inside the
/// subscriber's own signal handlers (re-entrant `request` and `cancel`).
pub trait Subscription: Send + Sync {
    /// Grant `n` additional values of demand.
    ///
    /// Demand is additive and saturates at [`UNBOUNDED`]. `request(0)` is a
    /// protocol error and is answered with [`FluxError::InvalidDemand`].
    fn request(&self, n: u64);

    /// Stop the producer from starting new work.
    ///
    /// Idempotent. Once it takes effect, no further signal is delivered.
    fn cancel(&self);
}

/// Shared handle to a subscription.
pub type SubscriptionRef = Arc<dyn Subscription>;

/// Consumer of the signals of one execution.
pub trait Subscriber<T>: Send {
    /// Receive the subscription. Always the first signal.
    fn on_subscribe(&mut self, subscription: SubscriptionRef);

    /// Receive one value. Never called beyond the granted demand.
    fn on_next(&mut self, value: T);

    /// Receive the terminal error signal.
    fn on_error(&mut self, error: FluxError);

    /// Receive the terminal completion signal.
    fn on_complete(&mut self);
}

/// Owned, type-erased subscriber.
pub type BoxSubscriber<T> = Box<dyn Subscriber<T>>;

impl<T, S> Subscriber<T> for Box<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        (**self).on_subscribe(subscription);
    }

    fn on_next(&mut self, value: T) {
        (**self).on_next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        (**self).on_error(error);
    }

    fn on_complete(&mut self) {
        (**self).on_complete();
    }
}

/// Re-subscribable description of how to produce signals.
pub trait Publisher<T>: Send + Sync {
    /// Start a new, independent execution delivering to `subscriber`.
    fn subscribe(&self, subscriber: BoxSubscriber<T>);
}

impl<T, F> Publisher<T> for F
where
    F: Fn(BoxSubscriber<T>) + Send + Sync,
{
    fn subscribe(&self, subscriber: BoxSubscriber<T>) {
        self(subscriber);
    }
}

/// A subscription that ignores every call.
///
/// Used by sources that terminate (or never signal) without producing values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSubscription;

impl NoopSubscription {
    /// Shared handle to a no-op subscription.
    #[must_use]
    pub fn shared() -> SubscriptionRef {
        Arc::new(Self)
    }
}

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}
