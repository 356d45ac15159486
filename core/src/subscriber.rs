//! Subscriber wrappers used at the user boundary.
//!
//! [`StrictSubscriber`] enforces the signal protocol on behalf of the
//! subscriber it wraps. Callback-based subscription goes through an internal
//! lambda subscriber and is controlled with a [`Disposable`].

use crate::demand::Demand;
use crate::error::FluxError;
use crate::protocol::{Subscriber, Subscription, SubscriptionRef, UNBOUNDED};
use crate::sync::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Forwards requests upstream while counting the granted demand.
struct TrackingSubscription {
    upstream: SubscriptionRef,
    demand: Demand,
}

impl Subscription for TrackingSubscription {
    fn request(&self, n: u64) {
        if n > 0 {
            self.demand.add(n);
        }
        tracing::trace!(n, "Request");
        self.upstream.request(n);
    }

    fn cancel(&self) {
        tracing::trace!("Cancel");
        self.upstream.cancel();
    }
}

/// Subscriber wrapper that aborts a subscription on protocol faults.
///
/// Detected faults:
///
/// - a second `on_subscribe`: the new subscription is cancelled
/// - `on_next` beyond the granted demand: upstream is cancelled and the
///   wrapped subscriber receives [`FluxError::ProtocolViolation`]
/// - a signal after a terminal signal: logged as
///   [`FluxError::DuplicateTerminalSignal`] (or a protocol violation for
///   values), upstream is cancelled and the signal is dropped
pub struct StrictSubscriber<S> {
    inner: S,
    subscription: Option<Arc<TrackingSubscription>>,
    terminal: Option<&'static str>,
    aborted: bool,
}

impl<S> StrictSubscriber<S> {
    /// Wrap `inner`.
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            subscription: None,
            terminal: None,
            aborted: false,
        }
    }

    fn cancel_upstream(&self) {
        if let Some(subscription) = &self.subscription {
            subscription.upstream.cancel();
        }
    }

    fn reject_terminal(&self, second: &'static str) -> bool {
        if let Some(first) = self.terminal {
            let error = FluxError::DuplicateTerminalSignal { first, second };
            tracing::error!(error = %error, "Dropping duplicate terminal signal");
            self.cancel_upstream();
            return true;
        }
        self.aborted
    }
}

impl<T, S> Subscriber<T> for StrictSubscriber<S>
where
    S: Subscriber<T>,
{
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.subscription.is_some() {
            let error = FluxError::ProtocolViolation("on_subscribe called twice".to_string());
            tracing::error!(error = %error, "Cancelling duplicate subscription");
            subscription.cancel();
            return;
        }
        let tracking = Arc::new(TrackingSubscription {
            upstream: subscription,
            demand: Demand::new(),
        });
        self.subscription = Some(Arc::clone(&tracking));
        self.inner.on_subscribe(tracking);
    }

    fn on_next(&mut self, value: T) {
        if self.aborted {
            return;
        }
        if let Some(first) = self.terminal {
            let error = FluxError::ProtocolViolation(format!("on_next after {first}"));
            tracing::error!(error = %error, "Dropping value");
            self.cancel_upstream();
            return;
        }
        let within_demand = self
            .subscription
            .as_ref()
            .is_some_and(|s| s.demand.get() > 0);
        if !within_demand {
            let error = FluxError::ProtocolViolation("on_next without demand".to_string());
            tracing::error!(error = %error, "Aborting subscription");
            self.aborted = true;
            self.cancel_upstream();
            self.inner.on_error(error);
            return;
        }
        if let Some(subscription) = &self.subscription {
            subscription.demand.produced(1);
        }
        self.inner.on_next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        if self.reject_terminal("on_error") {
            return;
        }
        self.terminal = Some("on_error");
        self.inner.on_error(error);
    }

    fn on_complete(&mut self) {
        if self.reject_terminal("on_complete") {
            return;
        }
        self.terminal = Some("on_complete");
        self.inner.on_complete();
    }
}

#[derive(Default)]
struct DisposableState {
    subscription: Mutex<Option<SubscriptionRef>>,
    disposed: AtomicBool,
}

/// Handle returned by callback-based subscription.
///
/// [`dispose`](Self::dispose) cancels the underlying subscription. A handle
/// also reports disposed once the sequence terminated.
#[derive(Clone, Default)]
pub struct Disposable {
    state: Arc<DisposableState>,
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Disposable {
    /// A handle not yet bound to a subscription.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the subscription. Idempotent.
    pub fn dispose(&self) {
        if self.state.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = lock(&self.state.subscription).take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    /// Whether the subscription was cancelled or terminated.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    fn bind(&self, subscription: SubscriptionRef) -> bool {
        if self.is_disposed() {
            subscription.cancel();
            return false;
        }
        *lock(&self.state.subscription) = Some(subscription);
        true
    }

    fn terminated(&self) {
        self.state.disposed.store(true, Ordering::Release);
        lock(&self.state.subscription).take();
    }
}

/// Subscriber built from callbacks; requests unbounded demand.
pub(crate) struct LambdaSubscriber<N, E, C> {
    on_next: N,
    on_error: Option<E>,
    on_complete: Option<C>,
    disposable: Disposable,
}

impl<N, E, C> LambdaSubscriber<N, E, C> {
    pub(crate) const fn new(on_next: N, on_error: E, on_complete: C, disposable: Disposable) -> Self {
        Self {
            on_next,
            on_error: Some(on_error),
            on_complete: Some(on_complete),
            disposable,
        }
    }
}

impl<T, N, E, C> Subscriber<T> for LambdaSubscriber<N, E, C>
where
    N: FnMut(T) + Send,
    E: FnOnce(FluxError) + Send,
    C: FnOnce() + Send,
{
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.disposable.bind(Arc::clone(&subscription)) {
            subscription.request(UNBOUNDED);
        }
    }

    fn on_next(&mut self, value: T) {
        (self.on_next)(value);
    }

    fn on_error(&mut self, error: FluxError) {
        self.disposable.terminated();
        if let Some(on_error) = self.on_error.take() {
            on_error(error);
        }
    }

    fn on_complete(&mut self) {
        self.disposable.terminated();
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
    }
}
