//! Demand hand-over between successive upstream subscriptions.

use crate::protocol::{SubscriptionRef, UNBOUNDED};
use crate::sync::lock;
use std::sync::Arc;
use std::sync::Mutex;

#[derive(Default)]
struct ArbiterState {
    requested: u64,
    current: Option<SubscriptionRef>,
    cancelled: bool,
    invalid: bool,
}

/// Keeps the outstanding demand of a stage that switches upstream.
///
/// Operators such as `concat`, `switch_if_empty` and `retry` subscribe to one
/// upstream after another. Demand not yet satisfied by the previous upstream
/// is requested from the next one when it is [`set`](Self::set). Upstream
/// calls are always made after releasing the internal lock.
#[derive(Default)]
pub(crate) struct SubscriptionArbiter {
    state: Mutex<ArbiterState>,
}

impl SubscriptionArbiter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Switch to a new upstream and forward the pending demand to it.
    pub(crate) fn set(&self, subscription: SubscriptionRef) {
        let (pending, invalid) = {
            let mut state = lock(&self.state);
            if state.cancelled {
                drop(state);
                subscription.cancel();
                return;
            }
            state.current = Some(Arc::clone(&subscription));
            (state.requested, std::mem::take(&mut state.invalid))
        };
        if invalid {
            subscription.request(0);
        } else if pending > 0 {
            subscription.request(pending);
        }
    }

    /// Account for one value delivered downstream.
    pub(crate) fn produced(&self, n: u64) {
        let mut state = lock(&self.state);
        if state.requested != UNBOUNDED {
            state.requested = state.requested.saturating_sub(n);
        }
    }

    /// Add downstream demand and forward it to the current upstream.
    ///
    /// `request(0)` is forwarded as is so the upstream reports it.
    pub(crate) fn request(&self, n: u64) {
        let current = {
            let mut state = lock(&self.state);
            if state.cancelled {
                return;
            }
            if n == 0 {
                if state.current.is_none() {
                    state.invalid = true;
                }
            } else {
                state.requested = state.requested.saturating_add(n);
            }
            state.current.clone()
        };
        if let Some(current) = current {
            current.request(n);
        }
    }

    /// Cancel the current upstream and any later one.
    pub(crate) fn cancel(&self) {
        let current = {
            let mut state = lock(&self.state);
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.current.take()
        };
        if let Some(current) = current {
            current.cancel();
        }
    }

    /// Drop the reference to a finished upstream.
    pub(crate) fn clear(&self) {
        lock(&self.state).current = None;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }

    pub(crate) fn requested(&self) -> u64 {
        lock(&self.state).requested
    }
}
