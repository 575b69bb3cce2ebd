//! Error and diagnostic types.
//!
//! Two very different kinds of "something went wrong" live here:
//! - [`DriverError`] is fatal. The hardware refused a setup or write, and the
//!   caller decides what to do about it. Nothing in this crate retries.
//! - [`Diagnostic`] is informational. A request was ignored (bad index, wrong
//!   channel type, unknown mode) but the system is still in a good state.
//!
//! ## Rust concepts
//! - `thiserror` derives `Display` and `std::error::Error` from attributes
//! - Returning non-fatal conditions as values instead of panicking

use crate::channel::Capability;
use thiserror::Error;

/// A failure reported by the output driver.
///
/// The messages are stored as `String` so the error can cross thread
/// boundaries (background pattern tasks report it back to the engine) and be
/// compared in tests.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("driver unavailable: {0}")]
    Unavailable(String),
    #[error("failed to set up channel {index}: {reason}")]
    Setup { index: usize, reason: String },
    #[error("failed to write channel {index}: {reason}")]
    Write { index: usize, reason: String },
    #[error("failed to tear down driver: {0}")]
    Teardown(String),
}

/// A non-fatal condition: the request had no effect, but nothing is broken.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Diagnostic {
    #[error("channel index {index} is out of range (channel count: {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("channel {index} is not {required:?}-capable")]
    CapabilityMismatch { index: usize, required: Capability },
    #[error("no analog-capable channels available")]
    NoAnalogChannels,
    #[error("invalid mode: {0} (expected 0-6)")]
    InvalidMode(u8),
    #[error("invalid interval: must be a positive number of seconds")]
    InvalidInterval,
    #[error("invalid duration: must be a non-negative number of seconds")]
    InvalidDuration,
}

/// Problems with a channel layout supplied on the command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("channel layout is empty")]
    Empty,
    #[error("GPIO pin {0} is listed more than once")]
    DuplicatePin(u8),
}
