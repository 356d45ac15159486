//! Retry with exponential backoff for sequences that fail transiently.
//!
//! [`RetryExt::retry_backoff`] resubscribes to a failed `Flux` or `Mono`
//! after a delay that grows exponentially with each attempt, randomised by
//! jitter so that many failing subscribers do not retry in lockstep.
//!
//! # Example
//!
//! ```rust
//! use rill_core::{Flux, immediate};
//! use rill_runtime::retry::{RetryExt, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(1))
//!     .max_delay(Duration::from_millis(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let value = Flux::just([42])
//!     .retry_backoff(policy, immediate())
//!     .block_last()
//!     .unwrap();
//! assert_eq!(value, Some(42));
//! ```

use crate::metrics::RetryMetrics;
use rand::Rng;
use rill_core::{Flux, FluxError, Mono, SchedulerRef};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: 0.5 (delays vary between 50% and 100% of the backoff)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of resubscriptions
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Fraction of each delay that is randomised, in `0.0..=1.0`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Backoff before retry number `attempt` (0-indexed), without jitter.
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Backoff before retry number `attempt` (0-indexed), with jitter.
    ///
    /// The base delay is scaled by a random factor in `(1 - jitter)..=1`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=1.0);
        base.mul_f64(factor)
    }

    /// Whether retry number `attempt` (1-based) is still allowed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the randomised fraction of each delay (clamped to `0.0..=1.0`).
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

type Retryable = Arc<dyn Fn(&FluxError) -> bool + Send + Sync>;

fn backoff_decision(
    policy: RetryPolicy,
    retryable: Retryable,
) -> impl Fn(&FluxError, u32) -> Option<Duration> + Send + Sync + 'static {
    move |error, attempt| {
        if !retryable(error) {
            tracing::warn!(error = %error, "Error is not retryable, failing immediately");
            return None;
        }
        if !policy.should_retry(attempt) {
            tracing::error!(attempt, error = %error, "Sequence failed after max retries");
            return None;
        }
        let delay = policy.delay_for_attempt(attempt - 1);
        RetryMetrics::record_attempt();
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis(),
            error = %error,
            "Sequence failed, retrying..."
        );
        Some(delay)
    }
}

/// Exponential-backoff retry for sequences.
pub trait RetryExt: Sized {
    /// Resubscribe after an error, waiting per `policy` on `scheduler`.
    ///
    /// Gives up after `policy.max_retries` resubscriptions and propagates
    /// the last error.
    #[must_use]
    fn retry_backoff(self, policy: RetryPolicy, scheduler: SchedulerRef) -> Self {
        self.retry_backoff_if(policy, scheduler, |_| true)
    }

    /// Like [`retry_backoff`](Self::retry_backoff), retrying only errors for
    /// which `retryable` holds.
    #[must_use]
    fn retry_backoff_if<P>(self, policy: RetryPolicy, scheduler: SchedulerRef, retryable: P) -> Self
    where
        P: Fn(&FluxError) -> bool + Send + Sync + 'static;
}

impl<T: Send + 'static> RetryExt for Flux<T> {
    fn retry_backoff_if<P>(self, policy: RetryPolicy, scheduler: SchedulerRef, retryable: P) -> Self
    where
        P: Fn(&FluxError) -> bool + Send + Sync + 'static,
    {
        self.retry_when(scheduler, backoff_decision(policy, Arc::new(retryable)))
    }
}

impl<T: Send + 'static> RetryExt for Mono<T> {
    fn retry_backoff_if<P>(self, policy: RetryPolicy, scheduler: SchedulerRef, retryable: P) -> Self
    where
        P: Fn(&FluxError) -> bool + Send + Sync + 'static,
    {
        self.retry_when(scheduler, backoff_decision(policy, Arc::new(retryable)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rill_core::immediate;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(failures: u32, counter: &Arc<AtomicU32>) -> Flux<u32> {
        let counter = Arc::clone(counter);
        Flux::defer(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt < failures {
                Flux::error(FluxError::message(format!("attempt {attempt} failed")))
            } else {
                Flux::just([attempt])
            }
        })
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build()
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.base_delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        // 1000ms * 10^5 = 100,000,000ms, but capped at 2000ms
        assert_eq!(policy.base_delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.base_delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .jitter(0.5)
            .build();
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
        let exact = RetryPolicy::builder().jitter(0.0).build();
        assert_eq!(exact.delay_for_attempt(0), Duration::from_millis(100));
    }

    #[test]
    fn test_retry_succeeds_on_first_try() {
        let counter = Arc::new(AtomicU32::new(0));
        let value = flaky(0, &counter)
            .retry_backoff(fast_policy(3), immediate())
            .block_last()
            .unwrap();
        assert_eq!(value, Some(0));
        assert_eq!(counter.load(Ordering::SeqCst), 1); // Only subscribed once
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let value = flaky(2, &counter)
            .retry_backoff(fast_policy(3), immediate())
            .block_last()
            .unwrap();
        assert_eq!(value, Some(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3); // 2 failures + 1 success
    }

    #[test]
    fn test_retry_exhausts_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let error = flaky(u32::MAX, &counter)
            .retry_backoff(fast_policy(2), immediate())
            .block_last()
            .unwrap_err();
        assert_eq!(error.to_string(), "attempt 2 failed");
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[test]
    fn test_retry_skips_non_retryable() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = flaky(u32::MAX, &counter)
            .retry_backoff_if(fast_policy(3), immediate(), |error| {
                error.to_string().contains("transient")
            })
            .block_last();
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1); // No retries for non-retryable error
    }

    #[test]
    fn test_mono_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let value = flaky(1, &counter)
            .next()
            .retry_backoff(fast_policy(1), immediate())
            .block()
            .unwrap();
        assert_eq!(value, Some(1));
    }
}
