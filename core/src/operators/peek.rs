//! Side-effect taps.
//!
//! Hooks observe signals without altering or delaying them. A panicking hook
//! is treated like a panicking transform: the panic becomes an error signal
//! (for `do_on_next` and `do_on_complete`) or is logged (for hooks that run
//! after the signal is already decided).

use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, Subscriber, Subscription, SubscriptionRef};
use std::fmt;
use std::sync::Arc;

type Hook = Arc<dyn Fn() + Send + Sync>;

struct Hooks<T> {
    on_subscribe: Option<Hook>,
    on_next: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&FluxError) + Send + Sync>>,
    on_complete: Option<Hook>,
    on_cancel: Option<Hook>,
    on_request: Option<Arc<dyn Fn(u64) + Send + Sync>>,
    after_terminate: Option<Hook>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_subscribe: None,
            on_next: None,
            on_error: None,
            on_complete: None,
            on_cancel: None,
            on_request: None,
            after_terminate: None,
        }
    }
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            on_subscribe: self.on_subscribe.clone(),
            on_next: self.on_next.clone(),
            on_error: self.on_error.clone(),
            on_complete: self.on_complete.clone(),
            on_cancel: self.on_cancel.clone(),
            on_request: self.on_request.clone(),
            after_terminate: self.after_terminate.clone(),
        }
    }
}

fn run_logged(hook: Option<&Hook>, name: &'static str) {
    if let Some(hook) = hook {
        if let Err(error) = guard(|| hook()) {
            tracing::error!(hook = name, error = %error, "Hook panicked");
        }
    }
}

struct PeekSubscription {
    upstream: SubscriptionRef,
    on_request: Option<Arc<dyn Fn(u64) + Send + Sync>>,
    on_cancel: Option<Hook>,
}

impl Subscription for PeekSubscription {
    fn request(&self, n: u64) {
        if let Some(hook) = &self.on_request {
            if let Err(error) = guard(|| hook(n)) {
                tracing::error!(hook = "do_on_request", error = %error, "Hook panicked");
            }
        }
        self.upstream.request(n);
    }

    fn cancel(&self) {
        run_logged(self.on_cancel.as_ref(), "do_on_cancel");
        self.upstream.cancel();
    }
}

struct PeekSubscriber<T> {
    downstream: BoxSubscriber<T>,
    hooks: Hooks<T>,
    upstream: Option<SubscriptionRef>,
    done: bool,
}

impl<T> PeekSubscriber<T> {
    fn fail(&mut self, error: FluxError) {
        self.done = true;
        if let Some(upstream) = &self.upstream {
            upstream.cancel();
        }
        self.downstream.on_error(error);
        run_logged(self.hooks.after_terminate.as_ref(), "do_after_terminate");
    }
}

impl<T: Send> Subscriber<T> for PeekSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.upstream = Some(Arc::clone(&subscription));
        if let Some(hook) = &self.hooks.on_subscribe {
            if let Err(error) = guard(|| hook()) {
                subscription.cancel();
                self.done = true;
                self.downstream.on_subscribe(subscription);
                self.downstream.on_error(error);
                return;
            }
        }
        let wrapped: SubscriptionRef =
            if self.hooks.on_request.is_some() || self.hooks.on_cancel.is_some() {
                Arc::new(PeekSubscription {
                    upstream: subscription,
                    on_request: self.hooks.on_request.clone(),
                    on_cancel: self.hooks.on_cancel.clone(),
                })
            } else {
                subscription
            };
        self.downstream.on_subscribe(wrapped);
    }

    fn on_next(&mut self, value: T) {
        if self.done {
            return;
        }
        if let Some(hook) = &self.hooks.on_next {
            if let Err(error) = guard(|| hook(&value)) {
                self.fail(error);
                return;
            }
        }
        self.downstream.on_next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(hook) = &self.hooks.on_error {
            if let Err(panic) = guard(|| hook(&error)) {
                tracing::error!(hook = "do_on_error", error = %panic, "Hook panicked");
            }
        }
        self.downstream.on_error(error);
        run_logged(self.hooks.after_terminate.as_ref(), "do_after_terminate");
    }

    fn on_complete(&mut self) {
        if self.done {
            return;
        }
        if let Some(hook) = &self.hooks.on_complete {
            if let Err(error) = guard(|| hook()) {
                self.fail(error);
                return;
            }
        }
        self.done = true;
        self.downstream.on_complete();
        run_logged(self.hooks.after_terminate.as_ref(), "do_after_terminate");
    }
}

impl<T: Send + 'static> Flux<T> {
    fn peek(self, hooks: Hooks<T>) -> Self {
        Self::from_fn(move |downstream| {
            self.subscribe_raw(PeekSubscriber {
                downstream,
                hooks: hooks.clone(),
                upstream: None,
                done: false,
            });
        })
    }

    /// Run `hook` when the subscription is received.
    #[must_use]
    pub fn do_on_subscribe(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.peek(Hooks {
            on_subscribe: Some(Arc::new(hook)),
            ..Hooks::default()
        })
    }

    /// Observe every value before it is delivered.
    #[must_use]
    pub fn do_on_next(self, hook: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.peek(Hooks {
            on_next: Some(Arc::new(hook)),
            ..Hooks::default()
        })
    }

    /// Observe the error signal before it is delivered.
    #[must_use]
    pub fn do_on_error(self, hook: impl Fn(&FluxError) + Send + Sync + 'static) -> Self {
        self.peek(Hooks {
            on_error: Some(Arc::new(hook)),
            ..Hooks::default()
        })
    }

    /// Run `hook` before the completion signal is delivered.
    #[must_use]
    pub fn do_on_complete(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.peek(Hooks {
            on_complete: Some(Arc::new(hook)),
            ..Hooks::default()
        })
    }

    /// Run `hook` when downstream cancels.
    #[must_use]
    pub fn do_on_cancel(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.peek(Hooks {
            on_cancel: Some(Arc::new(hook)),
            ..Hooks::default()
        })
    }

    /// Observe every demand request.
    #[must_use]
    pub fn do_on_request(self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.peek(Hooks {
            on_request: Some(Arc::new(hook)),
            ..Hooks::default()
        })
    }

    /// Run `hook` after either terminal signal was delivered.
    #[must_use]
    pub fn do_after_terminate(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.peek(Hooks {
            after_terminate: Some(Arc::new(hook)),
            ..Hooks::default()
        })
    }

    /// Log every signal as a `tracing` event at `INFO` level.
    ///
    /// Events use the `rill::log` target and carry `category` as a field.
    #[must_use]
    pub fn log(self, category: impl Into<String>) -> Self
    where
        T: fmt::Debug,
    {
        let category: Arc<str> = Arc::from(category.into());
        let on_subscribe = Arc::clone(&category);
        let on_next = Arc::clone(&category);
        let on_error = Arc::clone(&category);
        let on_complete = Arc::clone(&category);
        let on_cancel = Arc::clone(&category);
        let on_request = category;
        self.peek(Hooks {
            on_subscribe: Some(Arc::new(move || {
                tracing::info!(target: "rill::log", category = %on_subscribe, "onSubscribe");
            })),
            on_next: Some(Arc::new(move |value: &T| {
                tracing::info!(target: "rill::log", category = %on_next, "onNext({value:?})");
            })),
            on_error: Some(Arc::new(move |error: &FluxError| {
                tracing::info!(target: "rill::log", category = %on_error, "onError({error})");
            })),
            on_complete: Some(Arc::new(move || {
                tracing::info!(target: "rill::log", category = %on_complete, "onComplete()");
            })),
            on_cancel: Some(Arc::new(move || {
                tracing::info!(target: "rill::log", category = %on_cancel, "cancel()");
            })),
            on_request: Some(Arc::new(move |n| {
                if n == crate::protocol::UNBOUNDED {
                    tracing::info!(target: "rill::log", category = %on_request, "request(unbounded)");
                } else {
                    tracing::info!(target: "rill::log", category = %on_request, "request({n})");
                }
            })),
            after_terminate: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;
    use std::sync::Mutex;

    fn journal() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone + Send + Sync + 'static) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&entries);
        (entries, move |entry: &str| sink.lock().unwrap().push(entry.to_string()))
    }

    #[test]
    fn hooks_observe_signals_in_order() {
        let (entries, record) = journal();
        let (r1, r2, r3, r4) = (record.clone(), record.clone(), record.clone(), record);
        let recorder = Recorder::unbounded();
        Flux::just([1, 2])
            .do_on_subscribe(move || r1("subscribe"))
            .do_on_next(move |v| r2(&format!("next {v}")))
            .do_on_complete(move || r3("complete"))
            .do_after_terminate(move || r4("after"))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(
            *entries.lock().unwrap(),
            vec!["subscribe", "next 1", "next 2", "complete", "after"]
        );
        assert_eq!(recorder.values(), vec![1, 2]);
    }

    #[test]
    fn error_hook_sees_the_error() {
        let (entries, record) = journal();
        let recorder = Recorder::<i32>::unbounded();
        Flux::error(FluxError::message("boom"))
            .do_on_error(move |e| record(&e.to_string()))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(*entries.lock().unwrap(), vec!["boom"]);
        assert!(recorder.error().is_some());
    }

    #[test]
    fn cancel_and_request_hooks() {
        let (entries, record) = journal();
        let on_request = record.clone();
        let recorder = Recorder::with_demand(2);
        Flux::range(0, 10)
            .do_on_request(move |n| on_request(&format!("request {n}")))
            .do_on_cancel(move || record("cancel"))
            .subscribe_raw(recorder.subscriber());
        recorder.cancel();
        assert_eq!(*entries.lock().unwrap(), vec!["request 2", "cancel"]);
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_next_hook_fails_the_sequence() {
        let recorder = Recorder::unbounded();
        Flux::range(0, 5)
            .do_on_next(|v| assert!(*v < 1, "too large"))
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec![0]);
        assert!(recorder.error().is_some());
    }

    #[test]
    fn log_passes_signals_through() {
        let recorder = Recorder::unbounded();
        Flux::just(["foo", "bar"])
            .log("words")
            .subscribe_raw(recorder.subscriber());
        assert_eq!(recorder.values(), vec!["foo", "bar"]);
        assert!(recorder.is_completed());
    }
}
