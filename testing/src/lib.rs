//! # Rill Testing
//!
//! Testing utilities for Rill sequences.
//!
//! This crate provides:
//! - [`StepVerifier`]: a scripted, blocking verifier for sequences
//! - [`VirtualTimeScheduler`]: a scheduler driven by an explicit clock
//! - In-memory repositories for the repository boundary
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use rill_core::Flux;
//! use rill_testing::StepVerifier;
//! use std::time::Duration;
//!
//! // An hour of one-second ticks, verified without waiting an hour
//! StepVerifier::with_virtual_time(|scheduler| {
//!     Flux::interval(Duration::from_secs(1), scheduler).take(3600)
//! })
//! .expect_subscription()
//! .then_await(Duration::from_secs(3600))
//! .expect_next_count(3600)
//! .verify_complete()
//! .unwrap();
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Verification failures
pub mod error;

/// Property-based testing strategies using proptest
pub mod properties;

/// In-memory implementations of the repository boundary
pub mod repository;

/// Scripted verification of sequences
pub mod step_verifier;

/// Deterministic scheduler for time-based operators
pub mod virtual_time;

pub use error::VerificationError;
pub use repository::{InMemoryBlockingRepository, InMemoryReactiveRepository};
pub use step_verifier::{StepVerifier, Verification, VerifierConfig};
pub use virtual_time::VirtualTimeScheduler;

/// Lock a mutex, recovering the guard if a panicking task poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Install a `tracing` subscriber writing to the test output.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
