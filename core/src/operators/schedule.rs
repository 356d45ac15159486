//! Moving work between execution contexts.
//!
//! `subscribe_on` moves the act of subscribing (and so the start of the
//! producer) onto a scheduler. `publish_on` moves the delivery of signals
//! downstream of it onto a scheduler, through a bounded queue.

use crate::config::PublishOnConfig;
use crate::demand::{Demand, WorkInProgress};
use crate::error::FluxError;
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, Subscriber, Subscription, SubscriptionRef};
use crate::scheduler::SchedulerRef;
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct PublishOnState<T> {
    scheduler: SchedulerRef,
    prefetch: u64,
    limit: u64,
    downstream: Mutex<Option<BoxSubscriber<T>>>,
    upstream: Mutex<Option<SubscriptionRef>>,
    queue: Mutex<VecDeque<T>>,
    demand: Demand,
    wip: WorkInProgress,
    consumed: AtomicU64,
    done: AtomicBool,
    error: Mutex<Option<FluxError>>,
    cancelled: AtomicBool,
    invalid: AtomicBool,
}

impl<T: Send + 'static> PublishOnState<T> {
    fn schedule(self: &Arc<Self>) {
        if !self.wip.enter() {
            return;
        }
        let state = Arc::clone(self);
        self.scheduler.schedule(Box::new(move || state.drain()));
    }

    fn upstream(&self) -> Option<SubscriptionRef> {
        lock(&self.upstream).clone()
    }

    fn drain(&self) {
        let mut missed = 1;
        loop {
            if !self.drain_pass() {
                return;
            }
            missed = self.wip.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    /// Returns `false` once the stage reached a terminal state.
    fn drain_pass(&self) -> bool {
        let mut slot = lock(&self.downstream);
        let Some(downstream) = slot.as_mut() else {
            return true;
        };
        if self.cancelled.load(Ordering::Acquire) {
            lock(&self.queue).clear();
            slot.take();
            return false;
        }
        if self.invalid.swap(false, Ordering::AcqRel) {
            self.cancelled.store(true, Ordering::Release);
            lock(&self.queue).clear();
            let finished = slot.take();
            drop(slot);
            if let Some(upstream) = self.upstream() {
                upstream.cancel();
            }
            if let Some(mut downstream) = finished {
                downstream.on_error(FluxError::InvalidDemand(0));
            }
            return false;
        }

        let requested = self.demand.get();
        let mut emitted = 0;
        while emitted < requested {
            if self.cancelled.load(Ordering::Acquire) {
                return true;
            }
            let item = lock(&self.queue).pop_front();
            let Some(value) = item else {
                break;
            };
            downstream.on_next(value);
            emitted += 1;
            if self.consumed.fetch_add(1, Ordering::AcqRel) + 1 == self.limit {
                self.consumed.store(0, Ordering::Release);
                if let Some(upstream) = self.upstream() {
                    upstream.request(self.limit);
                }
            }
        }
        self.demand.produced(emitted);

        let drained = lock(&self.queue).is_empty();
        if self.done.load(Ordering::Acquire) && drained && !self.cancelled.load(Ordering::Acquire) {
            let finished = slot.take();
            drop(slot);
            let error = lock(&self.error).take();
            if let Some(mut downstream) = finished {
                match error {
                    Some(error) => downstream.on_error(error),
                    None => downstream.on_complete(),
                }
            }
            return false;
        }
        true
    }
}

struct PublishOnSubscription<T> {
    state: Arc<PublishOnState<T>>,
}

impl<T: Send + 'static> Subscription for PublishOnSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.state.invalid.store(true, Ordering::Release);
        } else {
            self.state.demand.add(n);
        }
        self.state.schedule();
    }

    fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::trace!(scheduler = self.state.scheduler.name(), "publish_on cancelled");
        if let Some(upstream) = self.state.upstream() {
            upstream.cancel();
        }
        self.state.schedule();
    }
}

struct PublishOnSubscriber<T> {
    state: Arc<PublishOnState<T>>,
}

impl<T: Send + 'static> Subscriber<T> for PublishOnSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.state.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        *lock(&self.state.upstream) = Some(Arc::clone(&subscription));
        subscription.request(self.state.prefetch);
    }

    fn on_next(&mut self, value: T) {
        lock(&self.state.queue).push_back(value);
        self.state.schedule();
    }

    fn on_error(&mut self, error: FluxError) {
        *lock(&self.state.error) = Some(error);
        self.state.done.store(true, Ordering::Release);
        self.state.schedule();
    }

    fn on_complete(&mut self) {
        self.state.done.store(true, Ordering::Release);
        self.state.schedule();
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Subscribe to `self` from a task on `scheduler`.
    ///
    /// Everything the upstream does while being subscribed, including a
    /// synchronous source emitting its values, runs on that scheduler.
    #[must_use]
    pub fn subscribe_on(self, scheduler: SchedulerRef) -> Self {
        Self::from_fn(move |downstream| {
            let source = self.clone();
            tracing::trace!(scheduler = scheduler.name(), "Scheduling subscription");
            scheduler.schedule(Box::new(move || source.subscribe_raw(downstream)));
        })
    }

    /// Deliver signals downstream of this point from tasks on `scheduler`.
    #[must_use]
    pub fn publish_on(self, scheduler: SchedulerRef) -> Self {
        self.publish_on_with(scheduler, PublishOnConfig::default())
    }

    /// Like [`publish_on`](Self::publish_on) with an explicit buffer size.
    ///
    /// Upstream is asked for `prefetch` values up front and replenished each
    /// time three quarters of that window were delivered. An upstream error
    /// is delivered after the values buffered before it.
    #[must_use]
    pub fn publish_on_with(self, scheduler: SchedulerRef, config: PublishOnConfig) -> Self {
        Self::from_fn(move |mut downstream| {
            let state = Arc::new(PublishOnState {
                scheduler: Arc::clone(&scheduler),
                prefetch: config.prefetch,
                limit: config.replenish_limit(),
                downstream: Mutex::new(None),
                upstream: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                demand: Demand::new(),
                wip: WorkInProgress::new(),
                consumed: AtomicU64::new(0),
                done: AtomicBool::new(false),
                error: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                invalid: AtomicBool::new(false),
            });
            downstream.on_subscribe(Arc::new(PublishOnSubscription {
                state: Arc::clone(&state),
            }));
            *lock(&state.downstream) = Some(downstream);
            self.subscribe_raw(PublishOnSubscriber {
                state: Arc::clone(&state),
            });
            state.schedule();
        })
    }
}
