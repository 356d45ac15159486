//! Synchronous one-to-one (or one-to-none) transforms.

use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, Subscriber, SubscriptionRef};
use std::error::Error as StdError;
use std::sync::Arc;

/// `Ok(None)` drops the value, `Err` fails the sequence.
pub(crate) type Transform<T, U> = Arc<dyn Fn(T) -> Result<Option<U>, FluxError> + Send + Sync>;

struct MapSubscriber<T, U> {
    downstream: BoxSubscriber<U>,
    transform: Transform<T, U>,
    upstream: Option<SubscriptionRef>,
    done: bool,
}

impl<T: Send, U: Send> Subscriber<T> for MapSubscriber<T, U> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.upstream = Some(Arc::clone(&subscription));
        self.downstream.on_subscribe(subscription);
    }

    fn on_next(&mut self, value: T) {
        if self.done {
            return;
        }
        let transform = &self.transform;
        match guard(|| transform(value)).and_then(|result| result) {
            Ok(Some(mapped)) => self.downstream.on_next(mapped),
            Ok(None) => {
                if let Some(upstream) = &self.upstream {
                    upstream.request(1);
                }
            }
            Err(error) => {
                self.done = true;
                if let Some(upstream) = &self.upstream {
                    upstream.cancel();
                }
                self.downstream.on_error(error);
            }
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
    pub(crate) fn transform<U: Send + 'static>(self, transform: Transform<T, U>) -> Flux<U> {
        Flux::from_fn(move |downstream| {
            self.subscribe_raw(MapSubscriber {
                downstream,
                transform: Arc::clone(&transform),
                upstream: None,
                done: false,
            });
        })
    }

    /// Transform every value with `mapper`.
    ///
    /// A panic inside `mapper` cancels upstream and terminates the sequence
    /// with an upstream error wrapping
    /// [`TransformPanicked`](crate::TransformPanicked).
    pub fn map<U, F>(self, mapper: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.transform(Arc::new(move |value| Ok::<_, FluxError>(Some(mapper(value)))))
    }

    /// Transform every value with a fallible `mapper`.
    ///
    /// `Err(e)` cancels upstream and terminates the sequence with
    /// [`FluxError::Upstream`] carrying `e`.
    pub fn try_map<U, E, F>(self, mapper: F) -> Flux<U>
    where
        U: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        self.transform(Arc::new(move |value| {
            mapper(value).map(Some).map_err(FluxError::upstream)
        }))
    }

    /// Keep only values matching `predicate`.
    ///
    /// Every dropped value is replaced by a `request(1)` upstream, so the
    /// downstream demand is still honoured.
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.transform(Arc::new(move |value| {
            Ok::<_, FluxError>(predicate(&value).then_some(value))
        }))
    }
}
