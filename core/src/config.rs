//! Explicit configuration for stateful operators.
//!
//! Every knob has a default matching common usage and a `const fn with_*`
//! builder method. Nothing is read from the environment or from globals.

/// How many inner sequences a flattening operator keeps subscribed at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Subscribe to every inner sequence as soon as it is produced
    #[default]
    Unbounded,
    /// Keep at most this many inner subscriptions active
    Bounded(usize),
}

impl Concurrency {
    /// Upstream demand needed to keep this many inners running.
    #[must_use]
    pub const fn upstream_demand(self) -> u64 {
        match self {
            Self::Unbounded => crate::protocol::UNBOUNDED,
            Self::Bounded(n) => {
                if n == 0 {
                    1
                } else {
                    n as u64
                }
            }
        }
    }
}

/// Configuration for `flat_map_with`.
///
/// # Example
///
/// ```
/// use rill_core::{Concurrency, FlatMapConfig};
///
/// let config = FlatMapConfig::default()
///     .with_concurrency(Concurrency::Bounded(4))
///     .with_prefetch(8);
/// assert_eq!(config.prefetch, 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatMapConfig {
    /// Maximum number of simultaneously subscribed inner sequences
    pub concurrency: Concurrency,
    /// Values requested from each inner sequence ahead of downstream demand
    pub prefetch: u64,
}

impl Default for FlatMapConfig {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::Unbounded,
            prefetch: 32,
        }
    }
}

impl FlatMapConfig {
    /// Set the inner concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-inner prefetch (minimum 1).
    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = if prefetch == 0 { 1 } else { prefetch };
        self
    }
}

/// Configuration for `publish_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOnConfig {
    /// Values buffered between the producing and the consuming context
    pub prefetch: u64,
}

impl Default for PublishOnConfig {
    fn default() -> Self {
        Self { prefetch: 256 }
    }
}

impl PublishOnConfig {
    /// Set the buffer size (minimum 1).
    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = if prefetch == 0 { 1 } else { prefetch };
        self
    }

    /// Consumed values after which the buffer is replenished upstream.
    #[must_use]
    pub const fn replenish_limit(&self) -> u64 {
        replenish_limit(self.prefetch)
    }
}

/// Configuration for `to_iterable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingConfig {
    /// Values requested ahead of the iterating thread
    pub prefetch: u64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self { prefetch: 32 }
    }
}

impl BlockingConfig {
    /// Set the prefetch (minimum 1).
    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: u64) -> Self {
        self.prefetch = if prefetch == 0 { 1 } else { prefetch };
        self
    }

    /// Consumed values after which the consumer requests more.
    #[must_use]
    pub const fn replenish_limit(&self) -> u64 {
        replenish_limit(self.prefetch)
    }
}

/// Replenish once three quarters of a prefetch window were consumed.
pub(crate) const fn replenish_limit(prefetch: u64) -> u64 {
    if prefetch == crate::protocol::UNBOUNDED {
        prefetch
    } else {
        let limit = prefetch - (prefetch >> 2);
        if limit == 0 { 1 } else { limit }
    }
}
