//! The single-value sequence type.
//!
//! A [`Mono`] shares the subscribe contract of [`Flux`] and adds one
//! invariant: at most one value precedes the terminal signal. Every
//! constructor and operator here preserves it, so the wrapper is a thin view
//! over a `Flux`.

use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{Publisher, Subscriber};
use crate::scheduler::SchedulerRef;
use crate::sources::iter::IterSubscription;
use crate::subscriber::Disposable;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Asynchronous sequence of zero or one value.
///
/// # Example
///
/// ```
/// use rill_core::Mono;
///
/// let greeting = Mono::just("hello").map(|s| format!("{s}, world"));
/// assert_eq!(greeting.block().unwrap().as_deref(), Some("hello, world"));
/// ```
pub struct Mono<T> {
    flux: Flux<T>,
}

impl<T> Clone for Mono<T> {
    fn clone(&self) -> Self {
        Self {
            flux: self.flux.clone(),
        }
    }
}

impl<T> fmt::Debug for Mono<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mono").finish_non_exhaustive()
    }
}

impl<T> From<Mono<T>> for Flux<T> {
    fn from(mono: Mono<T>) -> Self {
        mono.flux
    }
}

impl<T: Send + 'static> Mono<T> {
    /// Wrap a sequence known to emit at most one value.
    pub(crate) const fn from_flux_unchecked(flux: Flux<T>) -> Self {
        Self { flux }
    }

    /// Wrap a custom publisher, keeping at most its first value.
    pub fn from_publisher(publisher: impl Publisher<T> + 'static) -> Self {
        Flux::from_publisher(publisher).next()
    }

    /// View this `Mono` as a `Flux`.
    #[must_use]
    pub fn into_flux(self) -> Flux<T> {
        self.flux
    }

    // Construction

    /// Emit `value`, then complete.
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_flux_unchecked(Flux::just([value]))
    }

    /// Emit the value if there is one, otherwise complete empty.
    pub fn just_or_empty(value: Option<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_flux_unchecked(Flux::just(value))
    }

    /// Complete without a value.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_flux_unchecked(Flux::empty())
    }

    /// Fail immediately with `error`.
    #[must_use]
    pub fn error(error: FluxError) -> Self {
        Self::from_flux_unchecked(Flux::error(error))
    }

    /// Never signal anything after `on_subscribe`.
    #[must_use]
    pub fn never() -> Self {
        Self::from_flux_unchecked(Flux::never())
    }

    /// Compute the value with `callable` on every subscription.
    ///
    /// A panic inside `callable` becomes the error signal.
    pub fn from_callable<F>(callable: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(Flux::from_fn(move |subscriber| {
            match guard(&callable) {
                Ok(value) => IterSubscription::start(Box::new(std::iter::once(value)), subscriber),
                Err(error) => Flux::error(error).subscribe_raw(subscriber),
            }
        }))
    }

    /// Build a fresh `Mono` with `factory` on every subscription.
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(Flux::defer(move || factory().flux))
    }

    /// Mirror whichever candidate signals first.
    pub fn first(sources: impl IntoIterator<Item = Self>) -> Self {
        Self::from_flux_unchecked(Flux::first(sources.into_iter().map(|mono| mono.flux)))
    }

    // Subscription

    /// See [`Flux::subscribe_raw`].
    pub fn subscribe_raw(&self, subscriber: impl Subscriber<T> + 'static) {
        self.flux.subscribe_raw(subscriber);
    }

    /// See [`Flux::subscribe_with`].
    pub fn subscribe_with(&self, subscriber: impl Subscriber<T> + 'static) {
        self.flux.subscribe_with(subscriber);
    }

    /// See [`Flux::subscribe`].
    pub fn subscribe<N>(&self, on_next: N) -> Disposable
    where
        N: FnMut(T) + Send + 'static,
    {
        self.flux.subscribe(on_next)
    }

    /// See [`Flux::subscribe_all`].
    pub fn subscribe_all<N, E, C>(&self, on_next: N, on_error: E, on_complete: C) -> Disposable
    where
        N: FnMut(T) + Send + 'static,
        E: FnOnce(FluxError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.flux.subscribe_all(on_next, on_error, on_complete)
    }

    // Transformation

    /// Transform the value with `mapper`.
    pub fn map<U, F>(self, mapper: F) -> Mono<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Mono::from_flux_unchecked(self.flux.map(mapper))
    }

    /// Transform the value with a fallible `mapper`.
    pub fn try_map<U, E, F>(self, mapper: F) -> Mono<U>
    where
        U: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        Mono::from_flux_unchecked(self.flux.try_map(mapper))
    }

    /// Drop the value unless it matches `predicate`.
    #[must_use]
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(self.flux.filter(predicate))
    }

    /// Continue with the `Mono` produced from the value.
    pub fn flat_map<U, F>(self, mapper: F) -> Mono<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Mono<U> + Send + Sync + 'static,
    {
        Mono::from_flux_unchecked(self.flux.flat_map(move |value| mapper(value).flux))
    }

    /// Continue with the `Flux` produced from the value.
    pub fn flat_map_many<U, F>(self, mapper: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        self.flux.flat_map(mapper)
    }

    /// Pair this value with the value of `other`.
    pub fn zip_with<U: Send + 'static>(self, other: Mono<U>) -> Mono<(T, U)> {
        Mono::from_flux_unchecked(Flux::zip(self.flux, other.flux))
    }

    /// Emit this value, then the values of `other`.
    pub fn concat_with(self, other: Self) -> Flux<T> {
        self.flux.concat_with(other.flux)
    }

    /// Complete when this `Mono` completes, discarding the value.
    pub fn then(self) -> Mono<()> {
        self.flux.then()
    }

    // Recovery

    /// On error, continue with the `Mono` returned by `fallback`.
    #[must_use]
    pub fn on_error_resume<F>(self, fallback: F) -> Self
    where
        F: Fn(FluxError) -> Self + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(self.flux.on_error_resume(move |error| fallback(error).flux))
    }

    /// On an error matching `predicate`, continue with `fallback`.
    #[must_use]
    pub fn on_error_resume_if<P, F>(self, predicate: P, fallback: F) -> Self
    where
        P: Fn(&FluxError) -> bool + Send + Sync + 'static,
        F: Fn(FluxError) -> Self + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(
            self.flux
                .on_error_resume_if(predicate, move |error| fallback(error).flux),
        )
    }

    /// On error, emit `value` instead.
    #[must_use]
    pub fn on_error_return(self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_flux_unchecked(self.flux.on_error_return(value))
    }

    /// On an error matching `predicate`, emit `value` instead.
    #[must_use]
    pub fn on_error_return_if<P>(self, predicate: P, value: T) -> Self
    where
        T: Clone + Sync,
        P: Fn(&FluxError) -> bool + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(self.flux.on_error_return_if(predicate, value))
    }

    /// On an error whose cause is an `E`, emit `value` instead.
    #[must_use]
    pub fn on_error_return_of<E>(self, value: T) -> Self
    where
        T: Clone + Sync,
        E: StdError + 'static,
    {
        Self::from_flux_unchecked(self.flux.on_error_return_of::<E>(value))
    }

    /// Translate the error signal with `mapper`.
    #[must_use]
    pub fn on_error_map<F>(self, mapper: F) -> Self
    where
        F: Fn(FluxError) -> FluxError + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(self.flux.on_error_map(mapper))
    }

    /// If this `Mono` completes empty, continue with `alternate`.
    #[must_use]
    pub fn switch_if_empty(self, alternate: Self) -> Self {
        Self::from_flux_unchecked(self.flux.switch_if_empty(alternate.flux))
    }

    /// Resubscribe immediately after an error, at most `max_retries` times.
    #[must_use]
    pub fn retry(self, max_retries: u32) -> Self {
        Self::from_flux_unchecked(self.flux.retry(max_retries))
    }

    /// See [`Flux::retry_when`].
    #[must_use]
    pub fn retry_when<F>(self, scheduler: SchedulerRef, decide: F) -> Self
    where
        F: Fn(&FluxError, u32) -> Option<Duration> + Send + Sync + 'static,
    {
        Self::from_flux_unchecked(self.flux.retry_when(scheduler, decide))
    }

    // Side effects

    /// See [`Flux::do_on_subscribe`].
    #[must_use]
    pub fn do_on_subscribe(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self::from_flux_unchecked(self.flux.do_on_subscribe(hook))
    }

    /// Run `hook` with the value before it is delivered.
    #[must_use]
    pub fn do_on_next(self, hook: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self::from_flux_unchecked(self.flux.do_on_next(hook))
    }

    /// See [`Flux::do_on_error`].
    #[must_use]
    pub fn do_on_error(self, hook: impl Fn(&FluxError) + Send + Sync + 'static) -> Self {
        Self::from_flux_unchecked(self.flux.do_on_error(hook))
    }

    /// See [`Flux::do_on_complete`].
    #[must_use]
    pub fn do_on_complete(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self::from_flux_unchecked(self.flux.do_on_complete(hook))
    }

    /// See [`Flux::do_on_cancel`].
    #[must_use]
    pub fn do_on_cancel(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self::from_flux_unchecked(self.flux.do_on_cancel(hook))
    }

    /// See [`Flux::do_after_terminate`].
    #[must_use]
    pub fn do_after_terminate(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self::from_flux_unchecked(self.flux.do_after_terminate(hook))
    }

    /// See [`Flux::log`].
    #[must_use]
    pub fn log(self, category: impl Into<String>) -> Self
    where
        T: fmt::Debug,
    {
        Self::from_flux_unchecked(self.flux.log(category))
    }

    // Scheduling

    /// See [`Flux::subscribe_on`].
    #[must_use]
    pub fn subscribe_on(self, scheduler: SchedulerRef) -> Self {
        Self::from_flux_unchecked(self.flux.subscribe_on(scheduler))
    }

    /// See [`Flux::publish_on`].
    #[must_use]
    pub fn publish_on(self, scheduler: SchedulerRef) -> Self {
        Self::from_flux_unchecked(self.flux.publish_on(scheduler))
    }
}

impl Mono<u64> {
    /// Emit `0` once `delay` elapsed on `scheduler`.
    #[must_use]
    pub fn delay(delay: Duration, scheduler: SchedulerRef) -> Self {
        Self::from_flux_unchecked(Flux::interval_with(delay, delay, scheduler).take(1))
    }
}
