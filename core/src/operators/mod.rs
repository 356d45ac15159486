//! Operator library.
//!
//! Each submodule extends [`Flux`](crate::Flux) with an `impl` block. Shared
//! plumbing for stages that receive signals from more than one upstream lives
//! here.

mod aggregate;
mod arbiter;
mod concat;
mod flat_map;
mod map;
mod peek;
mod race;
mod recover;
mod retry;
mod schedule;
mod take;
mod zip;

pub(crate) use arbiter::SubscriptionArbiter;

use crate::demand::TerminalCell;
use crate::error::FluxError;
use crate::protocol::BoxSubscriber;
use crate::sync::lock;
use std::sync::Mutex;

/// Downstream subscriber shared by several upstream subscribers.
///
/// Values are delivered while holding the slot, which serializes emissions
/// coming from different threads. A terminal signal claims the
/// [`TerminalCell`], takes the subscriber out of the slot and is delivered
/// after the slot is released. Cancellation only writes the cell: it may run
/// inside `on_next`, where the slot is held.
pub(crate) struct Downstream<T> {
    slot: Mutex<Option<BoxSubscriber<T>>>,
    terminal: TerminalCell,
}

impl<T> Downstream<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            terminal: TerminalCell::new(),
        }
    }

    /// Install the subscriber once it received its subscription.
    pub(crate) fn set(&self, subscriber: BoxSubscriber<T>) {
        *lock(&self.slot) = Some(subscriber);
    }

    pub(crate) fn next(&self, value: T) {
        if !self.terminal.is_open() {
            return;
        }
        let mut slot = lock(&self.slot);
        if let Some(subscriber) = slot.as_mut() {
            subscriber.on_next(value);
        }
    }

    pub(crate) fn error(&self, error: FluxError) -> bool {
        if !self.terminal.terminate() {
            tracing::trace!(error = %error, "Discarding error after termination");
            return false;
        }
        let subscriber = lock(&self.slot).take();
        if let Some(mut subscriber) = subscriber {
            subscriber.on_error(error);
        }
        true
    }

    pub(crate) fn complete(&self) -> bool {
        if !self.terminal.terminate() {
            return false;
        }
        let subscriber = lock(&self.slot).take();
        if let Some(mut subscriber) = subscriber {
            subscriber.on_complete();
        }
        true
    }

    /// Returns `false` if a terminal signal or a cancel came first.
    pub(crate) fn cancel(&self) -> bool {
        self.terminal.cancel()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.terminal.is_cancelled()
    }

    pub(crate) fn is_done(&self) -> bool {
        !self.terminal.is_open()
    }
}
