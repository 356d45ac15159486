//! The multi-value sequence type.
//!
//! A [`Flux`] is an immutable, re-subscribable description of how to produce
//! zero or more values followed by at most one terminal signal. Subscribing
//! twice starts two independent executions that share no mutable state.
//!
//! Constructors live in this crate's `sources` module and operators in its
//! `operators` module; both extend `Flux` with further `impl` blocks.

use crate::error::FluxError;
use crate::protocol::{BoxSubscriber, Publisher, Subscriber};
use crate::subscriber::{Disposable, LambdaSubscriber, StrictSubscriber};
use std::fmt;
use std::sync::Arc;

/// Multi-value asynchronous sequence.
///
/// # Example
///
/// ```
/// use rill_core::Flux;
///
/// let words = Flux::from_iter(vec!["foo", "bar"]);
/// let upper: Vec<String> = words
///     .map(str::to_uppercase)
///     .to_iterable()
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(upper, ["FOO", "BAR"]);
/// ```
pub struct Flux<T> {
    publisher: Arc<dyn Publisher<T>>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T> fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Wrap a custom publisher.
    pub fn from_publisher(publisher: impl Publisher<T> + 'static) -> Self {
        Self {
            publisher: Arc::new(publisher),
        }
    }

    /// Build a sequence from a subscribe function.
    pub(crate) fn from_fn<F>(subscribe: F) -> Self
    where
        F: Fn(BoxSubscriber<T>) + Send + Sync + 'static,
    {
        Self::from_publisher(subscribe)
    }

    /// Subscribe without any protocol enforcement.
    ///
    /// Operators use this to chain stages. Application code should prefer
    /// [`subscribe_with`](Self::subscribe_with).
    pub fn subscribe_raw(&self, subscriber: impl Subscriber<T> + 'static) {
        self.publisher.subscribe(Box::new(subscriber));
    }

    /// Subscribe with a subscriber wrapped in [`StrictSubscriber`].
    ///
    /// The wrapper aborts the subscription when the sequence breaks the
    /// signal protocol (a value beyond demand, a second terminal signal).
    pub fn subscribe_with(&self, subscriber: impl Subscriber<T> + 'static) {
        self.subscribe_raw(StrictSubscriber::new(subscriber));
    }

    /// Consume every value with `on_next`, requesting unbounded demand.
    ///
    /// Errors are logged. The returned [`Disposable`] cancels the
    /// subscription.
    pub fn subscribe<N>(&self, on_next: N) -> Disposable
    where
        N: FnMut(T) + Send + 'static,
    {
        self.subscribe_all(
            on_next,
            |error| tracing::error!(error = %error, "Unhandled error signal"),
            || {},
        )
    }

    /// Consume every signal with the given callbacks, requesting unbounded
    /// demand.
    pub fn subscribe_all<N, E, C>(&self, on_next: N, on_error: E, on_complete: C) -> Disposable
    where
        N: FnMut(T) + Send + 'static,
        E: FnOnce(FluxError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let disposable = Disposable::new();
        self.subscribe_with(LambdaSubscriber::new(
            on_next,
            on_error,
            on_complete,
            disposable.clone(),
        ));
        disposable
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;
    use std::sync::Mutex;

    #[test]
    fn resubscribing_starts_independent_executions() {
        let flux = Flux::just([1, 2, 3]);
        let first = Recorder::unbounded();
        let second = Recorder::unbounded();
        flux.subscribe_raw(first.subscriber());
        flux.subscribe_raw(second.subscriber());
        assert_eq!(first.values(), vec![1, 2, 3]);
        assert_eq!(second.values(), vec![1, 2, 3]);
        assert!(first.is_completed() && second.is_completed());
    }

    #[test]
    fn subscribe_all_routes_every_signal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let values = Arc::clone(&seen);
        let done = Arc::clone(&seen);
        let disposable = Flux::range(1, 3).subscribe_all(
            move |v| values.lock().unwrap().push(v),
            |_| {},
            move || done.lock().unwrap().push(-1),
        );
        assert!(disposable.is_disposed());
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![1, 2, 3, -1]);
    }
}
