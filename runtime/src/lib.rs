//! # Rill Runtime
//!
//! Runtime services for Rill sequences.
//!
//! This crate provides the pieces that need an operating-system runtime
//! behind them: worker pools, timers with real jitter, metrics exporters and
//! the bridges between Rill and other programming models.
//!
//! ## Core Components
//!
//! - **Elastic scheduler**: a bounded, growable pool for blocking work
//! - **Retry with backoff**: exponential backoff with jitter on any `Flux` or `Mono`
//! - **Repository boundary**: adapters between blocking repositories and sequences
//! - **Stream bridge**: a `Flux` consumed as a `futures::Stream`
//!
//! ## Example
//!
//! ```
//! use rill_core::Flux;
//! use rill_runtime::{ElasticConfig, ElasticScheduler};
//!
//! let elastic = ElasticScheduler::new(ElasticConfig::default()).unwrap();
//! let last = Flux::range(1, 3)
//!     .map(|v| v * 10)
//!     .subscribe_on(elastic.as_scheduler())
//!     .block_last()
//!     .unwrap();
//! assert_eq!(last, Some(30));
//! ```

/// Elastic worker pool for blocking work
pub mod elastic;

/// Prometheus metrics for observability
pub mod metrics;

/// Adapters between blocking repositories and sequences
pub mod repository;

/// Retry with exponential backoff
pub mod retry;

/// Consuming sequences as async streams
pub mod stream;

/// Error types for runtime services
pub mod error {
    use thiserror::Error;

    /// Errors raised while building a scheduler
    #[derive(Error, Debug)]
    pub enum SchedulerError {
        /// The underlying worker pool could not be created
        ///
        /// Usually the operating system refused to spawn threads.
        #[error("Failed to build worker pool: {0}")]
        Build(#[from] std::io::Error),
    }
}

pub use elastic::{ElasticConfig, ElasticScheduler};
pub use error::SchedulerError;
pub use metrics::MetricsError;
pub use repository::{BlockingRepository, ReactiveRepository, blocking_to_flux, flux_to_blocking};
pub use retry::{RetryExt, RetryPolicy};
pub use stream::{FluxStream, into_stream, into_stream_with};
