//! Verification failures.

use std::time::Duration;
use thiserror::Error;

/// Why a [`StepVerifier`](crate::StepVerifier) script did not pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// A step observed a different signal than it expected.
    #[error("step {step}: expected {expected}, got {actual}")]
    Mismatch {
        /// Index of the failing step (0 is the subscription)
        step: usize,
        /// What the step expected
        expected: String,
        /// What was observed instead
        actual: String,
    },

    /// No signal arrived within the configured timeout.
    #[error("step {step}: no signal within {waited:?}")]
    Timeout {
        /// Index of the waiting step
        step: usize,
        /// How long the step waited
        waited: Duration,
    },

    /// The sequence released its subscriber without a terminal signal.
    #[error("sequence ended without a terminal signal")]
    MissingTerminal,

    /// A virtual-time step ran on a real-time verifier.
    #[error("step {step}: advancing time requires StepVerifier::with_virtual_time")]
    NotVirtual {
        /// Index of the offending step
        step: usize,
    },
}
