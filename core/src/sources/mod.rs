//! Sequence constructors.

mod interval;
pub(crate) mod iter;
mod misc;
