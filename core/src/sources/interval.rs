//! Time-driven source.

use crate::demand::Demand;
use crate::error::FluxError;
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, Subscription};
use crate::scheduler::{SchedulerRef, TaskHandle, run_periodically};
use crate::sync::lock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

struct IntervalSubscription {
    demand: Demand,
    invalid: AtomicBool,
    cancelled: AtomicBool,
    ticks: AtomicU64,
    handle: TaskHandle,
    downstream: Mutex<Option<BoxSubscriber<u64>>>,
}

impl IntervalSubscription {
    fn tick(&self) {
        if self.handle.is_cancelled() {
            return;
        }
        let mut slot = lock(&self.downstream);
        // A cancel that found the slot free already emptied it; one that
        // found it busy left the subscriber for us to drop.
        if self.cancelled.load(Ordering::Acquire) {
            slot.take();
            return;
        }
        let Some(downstream) = slot.as_mut() else {
            return;
        };
        if self.invalid.load(Ordering::Acquire) {
            drop(slot);
            self.fail(FluxError::InvalidDemand(0));
            return;
        }
        let tick = self.ticks.load(Ordering::Acquire);
        if self.demand.get() == 0 {
            drop(slot);
            tracing::warn!(tick, "Interval tick without demand");
            self.fail(FluxError::Overflow(format!(
                "could not emit tick {tick} due to lack of requests"
            )));
            return;
        }
        self.ticks.store(tick + 1, Ordering::Release);
        downstream.on_next(tick);
        self.demand.produced(1);
        if self.cancelled.load(Ordering::Acquire) {
            slot.take();
            return;
        }
        drop(slot);
        if self.invalid.load(Ordering::Acquire) {
            self.fail(FluxError::InvalidDemand(0));
        }
    }

    fn fail(&self, error: FluxError) {
        self.handle.cancel();
        let downstream = lock(&self.downstream).take();
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if let Some(mut downstream) = downstream {
            downstream.on_error(error);
        }
    }

    /// Take the subscriber unless a tick is emitting to it.
    fn try_take(&self) -> Option<BoxSubscriber<u64>> {
        match self.downstream.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl Subscription for IntervalSubscription {
    fn request(&self, n: u64) {
        if n > 0 {
            self.demand.add(n);
            return;
        }
        self.invalid.store(true, Ordering::Release);
        // A busy slot means a tick is emitting; it re-checks the flag.
        if let Some(mut downstream) = self.try_take() {
            self.handle.cancel();
            if !self.cancelled.load(Ordering::Acquire) {
                downstream.on_error(FluxError::InvalidDemand(0));
            }
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::trace!("Cancelling interval");
        self.handle.cancel();
        // Cancelling from inside `on_next` finds the slot held by the tick,
        // which drops the subscriber once `on_next` returns.
        drop(self.try_take());
    }
}

impl Flux<u64> {
    /// Emit `0, 1, 2, …` every `period` on `scheduler`, starting after one
    /// period.
    ///
    /// Ticks are never buffered: a tick that finds no outstanding demand
    /// terminates the sequence with [`FluxError::Overflow`].
    #[must_use]
    pub fn interval(period: Duration, scheduler: SchedulerRef) -> Self {
        Self::interval_with(period, period, scheduler)
    }

    /// Like [`interval`](Self::interval) with a distinct initial delay.
    #[must_use]
    pub fn interval_with(initial: Duration, period: Duration, scheduler: SchedulerRef) -> Self {
        Self::from_fn(move |mut subscriber| {
            let subscription = Arc::new(IntervalSubscription {
                demand: Demand::new(),
                invalid: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                ticks: AtomicU64::new(0),
                handle: TaskHandle::new(),
                downstream: Mutex::new(None),
            });
            subscriber.on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
            if subscription.handle.is_cancelled() {
                return;
            }
            *lock(&subscription.downstream) = Some(subscriber);
            if subscription.cancelled.load(Ordering::Acquire) {
                drop(subscription.try_take());
                return;
            }
            if subscription.invalid.load(Ordering::Acquire) {
                subscription.fail(FluxError::InvalidDemand(0));
                return;
            }
            let ticking = Arc::clone(&subscription);
            run_periodically(
                &scheduler,
                &subscription.handle,
                initial,
                period,
                Arc::new(move || ticking.tick()),
            );
        })
    }
}
