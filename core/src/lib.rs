//! # Rill Core
//!
//! Push-based asynchronous sequences with explicit backpressure.
//!
//! This crate provides the signal protocol, the two sequence types and the
//! operator library of the Rill reactive engine.
//!
//! ## Core Concepts
//!
//! - **Signal**: `Next(value)`, `Complete` or `Error(cause)`; at most one terminal signal per subscriber
//! - **Subscription**: per-subscribe demand channel (`request(n)`, `cancel()`)
//! - **Flux**: re-subscribable description of zero to many values
//! - **Mono**: a `Flux` that emits at most one value
//! - **Scheduler**: an explicitly injected execution context
//!
//! ## Protocol
//!
//! ```text
//! subscribe ──► on_subscribe(subscription) ──► request(n) ──► on_next × ≤n ──► on_complete | on_error
//!                                   ▲                                               │
//!                                   └──────────────── cancel() (at most once) ◄────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use rill_core::Flux;
//!
//! let doubled: Vec<i32> = Flux::just([1, 2, 3])
//!     .map(|v| v * 2)
//!     .to_iterable()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(doubled, vec![2, 4, 6]);
//! ```

/// Blocking interop at the outermost edge of a program
pub mod blocking;

/// Explicit configuration for stateful operators
pub mod config;

/// Demand accounting and drain-loop primitives
pub mod demand;

/// Error taxonomy carried by error signals
pub mod error;

/// The multi-value sequence type
pub mod flux;

/// The single-value sequence type
pub mod mono;

/// Publisher, subscriber and subscription contracts
pub mod protocol;

/// Execution contexts
pub mod scheduler;

/// Signal values
pub mod signal;

/// Subscriber wrappers used at the user boundary
pub mod subscriber;

mod operators;
mod sources;
mod sync;

#[cfg(test)]
mod test_support;

pub use blocking::BlockingIter;
pub use config::{BlockingConfig, Concurrency, FlatMapConfig, PublishOnConfig};
pub use demand::{Demand, StageLifecycle, StageState, TerminalCell, WorkInProgress};
pub use error::{ErrorMessage, FluxError, TransformPanicked};
pub use flux::Flux;
pub use mono::Mono;
pub use protocol::{
    BoxSubscriber, NoopSubscription, Publisher, Subscriber, Subscription, SubscriptionRef,
    UNBOUNDED,
};
pub use scheduler::{
    ImmediateScheduler, PeriodicTask, Scheduler, SchedulerRef, Task, TaskHandle, immediate,
    schedule_periodically,
};
pub use signal::{Signal, SignalKind};
pub use subscriber::{Disposable, StrictSubscriber};
