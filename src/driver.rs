//! Output driver boundary: the only place physical effects happen.
//!
//! The core never touches GPIO directly. Everything goes through the
//! [`OutputDriver`] trait, so the pattern engine can be tested on any machine
//! with [`SimulatedDriver`] and run on a Pi with `GpioDriver` (behind the
//! `hardware` feature).
//!
//! ## Rust concepts
//! - Traits as seams between logic and hardware
//! - `Box<dyn Trait + Send>` for a driver chosen at runtime
//! - `Arc<Mutex<Vec<_>>>` to share a recording between the driver and a test

use crate::channel::Capability;
use crate::error::DriverError;
use std::sync::{Arc, Mutex, PoisonError};

/// Everything the core needs from an output backend.
///
/// Implementations must be `Send` because the driver lives inside the
/// [`ChannelSet`](crate::channel::ChannelSet), which background pattern
/// threads share.
pub trait OutputDriver: Send {
    /// Prepare one output. Called once per channel at controller construction.
    fn setup_channel(&mut self, index: usize, capability: Capability) -> Result<(), DriverError>;

    /// Drive a Digital channel high or low.
    fn write_digital(&mut self, index: usize, on: bool) -> Result<(), DriverError>;

    /// Set the duty cycle (0-100) of an Analog channel.
    fn write_analog(&mut self, index: usize, duty: f32) -> Result<(), DriverError>;

    /// Release every output. Called once at shutdown.
    fn teardown(&mut self) -> Result<(), DriverError>;
}

// ── Simulated driver ───────────────────────────────────────────────

/// One call made against a driver, as recorded by [`SimulatedDriver`].
#[derive(Clone, Debug, PartialEq)]
pub enum DriverEvent {
    Setup(usize, Capability),
    Digital(usize, bool),
    Analog(usize, f32),
    Teardown,
}

/// Shared, cloneable view of everything a [`SimulatedDriver`] was asked to do.
///
/// Cloning the log clones the `Arc`, so a test can keep one handle while the
/// driver itself is moved into the controller.
#[derive(Clone, Debug, Default)]
pub struct DriverLog {
    events: Arc<Mutex<Vec<DriverEvent>>>,
}

impl DriverLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: DriverEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Copy of every recorded event, oldest first.
    pub fn events(&self) -> Vec<DriverEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events that touched `index`, in order.
    pub fn writes_to(&self, index: usize) -> Vec<DriverEvent> {
        self.events()
            .into_iter()
            .filter(|e| match e {
                DriverEvent::Digital(i, _) | DriverEvent::Analog(i, _) => *i == index,
                _ => false,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// In-memory driver used for `--simulate`, for machines without GPIO, and
/// by the tests.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    log: DriverLog,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver that records into an existing log.
    pub fn with_log(log: DriverLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> DriverLog {
        self.log.clone()
    }
}

impl OutputDriver for SimulatedDriver {
    fn setup_channel(&mut self, index: usize, capability: Capability) -> Result<(), DriverError> {
        tracing::debug!("sim: setup channel {} as {:?}", index, capability);
        self.log.push(DriverEvent::Setup(index, capability));
        Ok(())
    }

    fn write_digital(&mut self, index: usize, on: bool) -> Result<(), DriverError> {
        tracing::debug!("sim: channel {} -> {}", index, if on { "on" } else { "off" });
        self.log.push(DriverEvent::Digital(index, on));
        Ok(())
    }

    fn write_analog(&mut self, index: usize, duty: f32) -> Result<(), DriverError> {
        tracing::debug!("sim: channel {} -> {:.1}%", index, duty);
        self.log.push(DriverEvent::Analog(index, duty));
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), DriverError> {
        tracing::debug!("sim: teardown");
        self.log.push(DriverEvent::Teardown);
        Ok(())
    }
}
