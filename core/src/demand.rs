//! Demand accounting and drain-loop primitives.
//!
//! Every stateful stage in this crate serializes its emissions with the same
//! three building blocks:
//!
//! - [`Demand`] keeps the outstanding request count, saturating at
//!   [`UNBOUNDED`].
//! - [`WorkInProgress`] elects one thread at a time to run a stage's drain
//!   loop. Other threads only record that more work is pending, so a stage
//!   never blocks while another thread emits.
//! - [`TerminalCell`] is a single-assignment cell: the first writer of a
//!   terminal outcome (or of a cancellation) wins and every later writer is
//!   discarded.
//!
//! Multi-source operators additionally track their lifecycle through
//! [`StageLifecycle`].

use crate::error::FluxError;
use crate::protocol::UNBOUNDED;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Outstanding demand of one subscription.
#[derive(Debug, Default)]
pub struct Demand(AtomicU64);

impl Demand {
    /// Zero demand.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Current outstanding demand.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Add `n` to the demand, saturating at [`UNBOUNDED`].
    ///
    /// Returns the demand before the addition.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_add(n);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(previous) => return previous,
                Err(actual) => current = actual,
            }
        }
    }

    /// Record that `n` values were emitted.
    ///
    /// Unbounded demand is never decremented. Returns the remaining demand.
    pub fn produced(&self, n: u64) -> u64 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_sub(n);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether the demand reached the unbounded sentinel.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }
}

/// Reject a non-positive request.
///
/// # Errors
///
/// Returns [`FluxError::InvalidDemand`] when `n` is zero.
pub const fn validate(n: u64) -> Result<u64, FluxError> {
    if n == 0 {
        Err(FluxError::InvalidDemand(n))
    } else {
        Ok(n)
    }
}

/// Drain-loop election counter.
///
/// ```
/// use rill_core::WorkInProgress;
///
/// let wip = WorkInProgress::new();
/// assert!(wip.enter());
/// assert!(!wip.enter()); // another thread asked for a pass
/// assert_eq!(wip.leave(1), 1); // so the owner loops once more
/// assert_eq!(wip.leave(1), 0);
/// ```
#[derive(Debug, Default)]
pub struct WorkInProgress(AtomicU64);

impl WorkInProgress {
    /// No drain in progress.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Request a drain pass. Returns `true` if the caller now owns the loop.
    pub fn enter(&self) -> bool {
        self.0.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Give back `missed` passes. Returns the passes requested meanwhile.
    ///
    /// The owner keeps looping while the result is non-zero.
    pub fn leave(&self, missed: u64) -> u64 {
        self.0.fetch_sub(missed, Ordering::AcqRel) - missed
    }
}

const OPEN: u8 = 0;
const TERMINATED: u8 = 1;
const CANCELLED: u8 = 2;

/// Single-assignment terminal state.
///
/// A stage writes either "terminated" (it delivered or is about to deliver a
/// terminal signal) or "cancelled" (its downstream cancelled). Only the first
/// write succeeds.
#[derive(Debug, Default)]
pub struct TerminalCell(AtomicU8);

impl TerminalCell {
    /// An open cell.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(OPEN))
    }

    fn claim(&self, state: u8) -> bool {
        self.0
            .compare_exchange(OPEN, state, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the right to deliver the terminal signal.
    pub fn terminate(&self) -> bool {
        self.claim(TERMINATED)
    }

    /// Record a cancellation. Returns `false` if the cell was already written.
    pub fn cancel(&self) -> bool {
        self.claim(CANCELLED)
    }

    /// Whether nothing has been written yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire) == OPEN
    }

    /// Whether the cell holds a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }
}

/// Lifecycle state of a multi-source operator stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Created, no source subscribed yet
    Idle,
    /// Sources subscribed, values flowing
    Active,
    /// A source finished but buffered values remain to be paired
    Draining,
    /// A terminal signal was delivered or the stage was cancelled
    Terminated,
}

/// Atomic [`StageState`] holder.
///
/// Transitions only move forward: `Idle → Active → (Draining →) Terminated`.
#[derive(Debug)]
pub struct StageLifecycle(AtomicU8);

impl Default for StageLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl StageLifecycle {
    /// A stage in [`StageState::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    const fn decode(raw: u8) -> StageState {
        match raw {
            0 => StageState::Idle,
            1 => StageState::Active,
            2 => StageState::Draining,
            _ => StageState::Terminated,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StageState {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    fn advance(&self, to: u8) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= to {
                return false;
            }
            match self
                .0
                .compare_exchange_weak(current, to, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// `Idle → Active`.
    pub fn activate(&self) -> bool {
        self.advance(1)
    }

    /// `Active → Draining`.
    pub fn begin_draining(&self) -> bool {
        self.advance(2)
    }

    /// Move to [`StageState::Terminated`]. Only the first caller gets `true`.
    pub fn terminate(&self) -> bool {
        self.advance(3)
    }

    /// Whether the stage reached [`StageState::Terminated`].
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == StageState::Terminated
    }
}
