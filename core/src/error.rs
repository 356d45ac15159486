//! Error taxonomy for error signals.
//!
//! Every failure that reaches a subscriber travels as a [`FluxError`] inside an
//! `on_error` signal. Failures raised by sources or user transforms are wrapped
//! in [`FluxError::Upstream`] and keep their original cause, so recovery
//! operators can match on the cause's type:
//!
//! ```
//! use rill_core::{ErrorMessage, FluxError};
//!
//! let error = FluxError::upstream(ErrorMessage::new("boom"));
//! assert!(error.is::<ErrorMessage>());
//! assert_eq!(error.to_string(), "boom");
//! ```

use std::any::Any;
use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, type-erased cause of an upstream failure.
pub type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors delivered through the error channel of a sequence.
///
/// `FluxError` is `Clone` because one terminal error may be fanned out to
/// several stages (for example a merge cancelling its siblings).
#[derive(Error, Debug, Clone)]
pub enum FluxError {
    /// `request(0)` was issued on a subscription
    #[error("invalid demand: request({0}) must be positive")]
    InvalidDemand(u64),

    /// A second terminal signal was observed for one subscription
    ///
    /// This is a programming-contract violation; the offending subscription
    /// is aborted.
    #[error("duplicate terminal signal: {second} after {first}")]
    DuplicateTerminalSignal {
        /// The terminal signal that was delivered
        first: &'static str,
        /// The terminal signal that was rejected
        second: &'static str,
    },

    /// Any other breach of the subscription protocol
    #[error("subscription protocol violation: {0}")]
    ProtocolViolation(String),

    /// A time-driven source had a value ready but no demand to emit it
    #[error("overflow: {0}")]
    Overflow(String),

    /// A failure raised by a source or a user transform
    #[error(transparent)]
    Upstream(BoxError),

    /// A blocking wait exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl FluxError {
    /// Wrap a failure raised by a source or transform.
    #[must_use]
    pub fn upstream<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Upstream(Arc::new(error))
    }

    /// Create an upstream error from a plain message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::upstream(ErrorMessage::new(message))
    }

    /// Convert a panic payload caught at an operator boundary.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::upstream(TransformPanicked(message))
    }

    /// The original cause, if this is an upstream failure.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Upstream(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// Whether the original cause is of type `E`.
    #[must_use]
    pub fn is<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.downcast_ref::<E>().is_some()
    }

    /// Borrow the original cause as `E`.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.cause().and_then(|cause| cause.downcast_ref::<E>())
    }

    /// Short stable label for logs and metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::InvalidDemand(_) => "invalid_demand",
            Self::DuplicateTerminalSignal { .. } => "duplicate_terminal_signal",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Overflow(_) => "overflow",
            Self::Upstream(_) => "upstream_error",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// A failure described only by its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ErrorMessage(pub String);

impl ErrorMessage {
    /// Create a new message error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A user callback panicked inside an operator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transform panicked: {0}")]
pub struct TransformPanicked(pub String);

/// Run a user callback, converting a panic into an upstream error.
pub(crate) fn guard<R>(callback: impl FnOnce() -> R) -> Result<R, FluxError> {
    catch_unwind(AssertUnwindSafe(callback)).map_err(|payload| FluxError::from_panic(&*payload))
}
