//! Pattern engine for GPIO-driven LEDs, plus the pieces the binaries share.
//!
//! The core lives in four modules:
//! - [`channel`]: channel state and the driver behind it
//! - [`pattern`]: every light pattern as a lazy sequence of frames
//! - [`engine`]: runs one pattern at a time on a background thread
//! - [`controller`]: the façade callers use
//!
//! Around it sit the output drivers ([`driver`], and `gpio` with the
//! `hardware` feature), the interactive [`menu`] and the HTTP [`server`].
//! This file holds the channel layout configuration and driver selection.

pub mod channel;
pub mod controller;
pub mod driver;
pub mod engine;
pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;
pub mod menu;
pub mod pattern;
pub mod server;

use channel::Capability;
use driver::{OutputDriver, SimulatedDriver};
use error::{DriverError, LayoutError};
use std::collections::HashSet;

/// Plain GPIO pins used when none are given (BCM numbering).
pub const DEFAULT_DIGITAL_PINS: [u8; 8] = [18, 19, 20, 21, 22, 23, 24, 25];

/// PWM-capable pins used when none are given (BCM numbering).
pub const DEFAULT_PWM_PINS: [u8; 3] = [12, 13, 16];

// ── Channel layout ─────────────────────────────────────────────────

/// One channel: which pin drives it and what it can do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub pin: u8,
    pub capability: Capability,
}

/// The ordered list of channels the controller manages.
///
/// # Rust concept: validated construction
/// The only way to build a layout is through `from_pins`, which rejects
/// duplicates and empty input. Every `ChannelLayout` in the program is
/// therefore known-good, and nothing downstream has to re-check it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelLayout {
    channels: Vec<ChannelSpec>,
}

impl ChannelLayout {
    /// Digital pins become channels `0..digital.len()`, PWM pins follow.
    pub fn from_pins(digital: &[u8], pwm: &[u8]) -> Result<Self, LayoutError> {
        let mut seen = HashSet::new();
        let channels: Vec<ChannelSpec> = digital
            .iter()
            .map(|&pin| (pin, Capability::Digital))
            .chain(pwm.iter().map(|&pin| (pin, Capability::Analog)))
            .map(|(pin, capability)| {
                if seen.insert(pin) {
                    Ok(ChannelSpec { pin, capability })
                } else {
                    Err(LayoutError::DuplicatePin(pin))
                }
            })
            .collect::<Result<_, _>>()?;

        if channels.is_empty() {
            return Err(LayoutError::Empty);
        }
        Ok(Self { channels })
    }

    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.channels.iter().map(|c| c.capability).collect()
    }

    /// Pin for each channel index.
    pub fn pins(&self) -> Vec<u8> {
        self.channels.iter().map(|c| c.pin).collect()
    }

    pub fn digital_pins(&self) -> Vec<u8> {
        self.pins_with(Capability::Digital)
    }

    pub fn pwm_pins(&self) -> Vec<u8> {
        self.pins_with(Capability::Analog)
    }

    fn pins_with(&self, capability: Capability) -> Vec<u8> {
        self.channels
            .iter()
            .filter(|c| c.capability == capability)
            .map(|c| c.pin)
            .collect()
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        let digital = DEFAULT_DIGITAL_PINS.iter().map(|&pin| ChannelSpec {
            pin,
            capability: Capability::Digital,
        });
        let pwm = DEFAULT_PWM_PINS.iter().map(|&pin| ChannelSpec {
            pin,
            capability: Capability::Analog,
        });
        Self {
            channels: digital.chain(pwm).collect(),
        }
    }
}

// ── Driver selection ───────────────────────────────────────────────

/// Create the output driver for `layout`.
///
/// With the `hardware` feature this opens the Pi's GPIO unless `simulate`
/// is set. Without it, the simulated driver is the only option.
///
/// # Rust concept: trait objects
/// Both drivers implement `OutputDriver`, so the caller gets a
/// `Box<dyn OutputDriver>` and never needs to know which one it has.
pub fn create_driver(
    layout: &ChannelLayout,
    simulate: bool,
) -> Result<Box<dyn OutputDriver>, DriverError> {
    if simulate {
        tracing::info!("Using simulated output driver");
        return Ok(Box::new(SimulatedDriver::new()));
    }

    hardware_driver(layout)
}

#[cfg(feature = "hardware")]
fn hardware_driver(layout: &ChannelLayout) -> Result<Box<dyn OutputDriver>, DriverError> {
    let driver = gpio::GpioDriver::new(layout.pins())?;
    Ok(Box::new(driver))
}

#[cfg(not(feature = "hardware"))]
fn hardware_driver(layout: &ChannelLayout) -> Result<Box<dyn OutputDriver>, DriverError> {
    tracing::warn!(
        "Built without the 'hardware' feature; simulating {} channels",
        layout.len()
    );
    Ok(Box::new(SimulatedDriver::new()))
}

// ── Tests ──────────────────────────────────────────────────────────
