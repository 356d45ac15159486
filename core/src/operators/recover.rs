//! Error recovery and empty-sequence fallback.
//!
//! All operators here share one stage: subscribe to the primary sequence and,
//! on a trigger (a matching error, or completion without values), switch the
//! same downstream over to a fallback sequence. Outstanding demand is carried
//! over by a [`SubscriptionArbiter`].

use super::{Downstream, SubscriptionArbiter};
use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{Subscriber, Subscription, SubscriptionRef};
use std::error::Error as StdError;
use std::sync::Arc;

type Resume<T> = Arc<dyn Fn(FluxError) -> Result<Flux<T>, FluxError> + Send + Sync>;

struct SwitchState<T> {
    arbiter: SubscriptionArbiter,
    downstream: Downstream<T>,
    on_error: Option<Resume<T>>,
    on_empty: Option<Flux<T>>,
}

impl<T: Send + 'static> SwitchState<T> {
    fn switch_to(self: &Arc<Self>, fallback: &Flux<T>) {
        self.arbiter.clear();
        fallback.subscribe_raw(SwitchSubscriber {
            state: Arc::clone(self),
            fallback: true,
            seen_value: false,
        });
    }
}

impl<T: Send + 'static> Subscription for SwitchState<T> {
    fn request(&self, n: u64) {
        self.arbiter.request(n);
    }

    fn cancel(&self) {
        if self.downstream.cancel() {
            self.arbiter.cancel();
        }
    }
}

struct SwitchSubscriber<T> {
    state: Arc<SwitchState<T>>,
    fallback: bool,
    seen_value: bool,
}

impl<T: Send + 'static> Subscriber<T> for SwitchSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.state.arbiter.set(subscription);
    }

    fn on_next(&mut self, value: T) {
        self.seen_value = true;
        self.state.arbiter.produced(1);
        self.state.downstream.next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        let resume = match (&self.state.on_error, self.fallback) {
            (Some(resume), false) => resume,
            _ => {
                self.state.downstream.error(error);
                return;
            }
        };
        match guard(|| resume(error)).and_then(|result| result) {
            Ok(fallback) => {
                tracing::debug!("Resuming with fallback sequence");
                self.state.switch_to(&fallback);
            }
            Err(error) => {
                self.state.downstream.error(error);
            }
        }
    }

    fn on_complete(&mut self) {
        if !self.fallback && !self.seen_value {
            if let Some(alternate) = &self.state.on_empty {
                self.state.switch_to(alternate);
                return;
            }
        }
        self.state.downstream.complete();
    }
}

impl<T: Send + 'static> Flux<T> {
    fn switch_on(self, on_error: Option<Resume<T>>, on_empty: Option<Self>) -> Self {
        Self::from_fn(move |mut downstream| {
            let state = Arc::new(SwitchState {
                arbiter: SubscriptionArbiter::new(),
                downstream: Downstream::new(),
                on_error: on_error.clone(),
                on_empty: on_empty.clone(),
            });
            downstream.on_subscribe(Arc::clone(&state) as SubscriptionRef);
            state.downstream.set(downstream);
            self.subscribe_raw(SwitchSubscriber {
                state,
                fallback: false,
                seen_value: false,
            });
        })
    }

    /// On error, continue with the sequence returned by `fallback`.
    ///
    /// Values already emitted by `self` are kept; the fallback's values
    /// follow them.
    #[must_use]
    pub fn on_error_resume<F>(self, fallback: F) -> Self
    where
        F: Fn(FluxError) -> Self + Send + Sync + 'static,
    {
        self.switch_on(
            Some(Arc::new(move |error| Ok::<_, FluxError>(fallback(error)))),
            None,
        )
    }

    /// On an error matching `predicate`, continue with `fallback`; other
    /// errors pass through unchanged.
    #[must_use]
    pub fn on_error_resume_if<P, F>(self, predicate: P, fallback: F) -> Self
    where
        P: Fn(&FluxError) -> bool + Send + Sync + 'static,
        F: Fn(FluxError) -> Self + Send + Sync + 'static,
    {
        self.switch_on(
            Some(Arc::new(move |error| {
                if predicate(&error) {
                    Ok(fallback(error))
                } else {
                    Err(error)
                }
            })),
            None,
        )
    }

    /// On an error whose cause is an `E`, continue with `fallback`.
    #[must_use]
    pub fn on_error_resume_of<E, F>(self, fallback: F) -> Self
    where
        E: StdError + 'static,
        F: Fn(FluxError) -> Self + Send + Sync + 'static,
    {
        self.on_error_resume_if(FluxError::is::<E>, fallback)
    }

    /// On error, emit `value` and complete.
    #[must_use]
    pub fn on_error_return(self, value: T) -> Self
    where
        T: Clone + Sync,
    {
        self.on_error_resume(move |_| Self::just([value.clone()]))
    }

    /// On an error matching `predicate`, emit `value` and complete; other
    /// errors pass through unchanged.
    #[must_use]
    pub fn on_error_return_if<P>(self, predicate: P, value: T) -> Self
    where
        T: Clone + Sync,
        P: Fn(&FluxError) -> bool + Send + Sync + 'static,
    {
        self.on_error_resume_if(predicate, move |_| Self::just([value.clone()]))
    }

    /// On an error whose cause is an `E`, emit `value` and complete.
    #[must_use]
    pub fn on_error_return_of<E>(self, value: T) -> Self
    where
        T: Clone + Sync,
        E: StdError + 'static,
    {
        self.on_error_return_if(FluxError::is::<E>, value)
    }

    /// Translate the error signal with `mapper`.
    #[must_use]
    pub fn on_error_map<F>(self, mapper: F) -> Self
    where
        F: Fn(FluxError) -> FluxError + Send + Sync + 'static,
    {
        self.on_error_resume(move |error| Self::error(mapper(error)))
    }

    /// If `self` completes without emitting, continue with `alternate`.
    #[must_use]
    pub fn switch_if_empty(self, alternate: Self) -> Self {
        self.switch_on(None, Some(alternate))
    }
}
