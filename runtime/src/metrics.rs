//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for runtime services:
//! - Scheduler task submission and completion
//! - Retry attempts
//!
//! Without an installed recorder the `metrics` macros are no-ops, so
//! recording is always safe.
//!
//! # Example
//!
//! ```rust
//! use rill_runtime::metrics::MetricsExporter;
//!
//! let exporter = MetricsExporter::install().unwrap();
//! let text = exporter.render();
//! # let _ = text;
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge};

/// Counter of tasks handed to a scheduler
pub const TASKS_SUBMITTED: &str = "rill_scheduler_tasks_submitted_total";
/// Counter of tasks a scheduler finished running
pub const TASKS_COMPLETED: &str = "rill_scheduler_tasks_completed_total";
/// Gauge of tasks currently running on a scheduler
pub const ACTIVE_TASKS: &str = "rill_scheduler_active_tasks";
/// Counter of resubscriptions made by `retry_backoff`
pub const RETRY_ATTEMPTS: &str = "rill_retry_attempts_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

static INSTALLED: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Process-wide Prometheus recorder.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

impl MetricsExporter {
    /// Install the Prometheus recorder and register metric descriptions.
    ///
    /// Installing twice returns the recorder installed first.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if another recorder already owns the
    /// global slot.
    pub fn install() -> Result<Self, MetricsError> {
        let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = installed.as_ref() {
            return Ok(Self {
                handle: handle.clone(),
            });
        }
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();
        tracing::info!("Prometheus metrics recorder installed");
        *installed = Some(handle.clone());
        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(TASKS_SUBMITTED, "Total number of tasks submitted to a scheduler");
    describe_counter!(TASKS_COMPLETED, "Total number of tasks a scheduler finished");
    describe_gauge!(ACTIVE_TASKS, "Number of tasks currently running on a scheduler");
    describe_counter!(RETRY_ATTEMPTS, "Total number of retry resubscriptions");
}

/// Scheduler metrics recorder.
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record a task handed to `scheduler`.
    pub fn record_submitted(scheduler: &str) {
        counter!(TASKS_SUBMITTED, "scheduler" => scheduler.to_string()).increment(1);
    }

    /// Record a task starting on `scheduler`.
    ///
    /// The task counts as active until the returned guard drops, which also
    /// happens when the task panics.
    #[must_use]
    pub fn track(scheduler: &str) -> ActiveTask {
        gauge!(ACTIVE_TASKS, "scheduler" => scheduler.to_string()).increment(1.0);
        ActiveTask {
            scheduler: scheduler.to_string(),
        }
    }
}

/// A task running on a scheduler. Dropping it records the completion.
#[derive(Debug)]
pub struct ActiveTask {
    scheduler: String,
}

impl Drop for ActiveTask {
    fn drop(&mut self) {
        gauge!(ACTIVE_TASKS, "scheduler" => self.scheduler.clone()).decrement(1.0);
        counter!(TASKS_COMPLETED, "scheduler" => self.scheduler.clone()).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!(RETRY_ATTEMPTS).increment(1);
    }
}
