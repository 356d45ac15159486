//! Signal values.
//!
//! A [`Signal`] is the reified form of one subscriber callback. Recording
//! subscribers and the step verifier compare sequences of signals.

use crate::error::FluxError;
use std::fmt;

/// One observed signal.
#[derive(Debug, Clone)]
pub enum Signal<T> {
    /// A value
    Next(T),
    /// Successful termination
    Complete,
    /// Failed termination
    Error(FluxError),
}

/// Discriminant of a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// `on_next`
    Next,
    /// `on_complete`
    Complete,
    /// `on_error`
    Error,
}

impl<T> Signal<T> {
    /// The kind of this signal.
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::Next(_) => SignalKind::Next,
            Self::Complete => SignalKind::Complete,
            Self::Error(_) => SignalKind::Error,
        }
    }

    /// Whether this signal ends the sequence.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next(_))
    }

    /// The value carried by a `Next` signal.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Next(value) => Some(value),
            _ => None,
        }
    }

    /// The error carried by an `Error` signal.
    #[must_use]
    pub const fn error(&self) -> Option<&FluxError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl<T: PartialEq> PartialEq for Signal<T> {
    /// Errors compare equal by message, since causes are type-erased.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Next(a), Self::Next(b)) => a == b,
            (Self::Complete, Self::Complete) => true,
            (Self::Error(a), Self::Error(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Display for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(value) => write!(f, "onNext({value:?})"),
            Self::Complete => write!(f, "onComplete()"),
            Self::Error(error) => write!(f, "onError({error})"),
        }
    }
}

impl SignalKind {
    /// Callback name of this kind, for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Next => "onNext",
            Self::Complete => "onComplete",
            Self::Error => "onError",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
