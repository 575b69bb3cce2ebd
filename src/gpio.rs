//! Raspberry Pi GPIO driver (requires the `hardware` feature).
//!
//! Digital channels are plain outputs. Analog channels use `rppal`'s
//! software PWM at 1 kHz, so any pin can fade, not just the hardware PWM
//! ones.
//!
//! ## Rust concepts
//! - `map_err` to translate a library's error into our own error type
//! - `Option<OutputPin>` slots: a pin exists only after `setup_channel`
//! - Pins reset to their original mode when the `OutputPin` is dropped

use crate::channel::Capability;
use crate::driver::OutputDriver;
use crate::error::DriverError;
use rppal::gpio::{Gpio, OutputPin};

/// PWM carrier frequency for Analog channels.
pub const PWM_FREQUENCY_HZ: f64 = 1000.0;

pub struct GpioDriver {
    gpio: Gpio,
    /// BCM pin number for each channel index.
    pins: Vec<u8>,
    outputs: Vec<Option<OutputPin>>,
}

impl GpioDriver {
    /// Open the GPIO peripheral. Fails when not running on a Pi or without
    /// access to `/dev/gpiomem`.
    pub fn new(pins: Vec<u8>) -> Result<Self, DriverError> {
        let gpio = Gpio::new().map_err(|e| DriverError::Unavailable(e.to_string()))?;
        let outputs = pins.iter().map(|_| None).collect();
        tracing::info!("GPIO opened for pins {:?}", pins);
        Ok(Self {
            gpio,
            pins,
            outputs,
        })
    }

    fn output(&mut self, index: usize) -> Result<&mut OutputPin, DriverError> {
        self.outputs
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| DriverError::Write {
                index,
                reason: "channel was never set up".to_string(),
            })
    }
}

impl OutputDriver for GpioDriver {
    fn setup_channel(&mut self, index: usize, capability: Capability) -> Result<(), DriverError> {
        let setup_error = |reason: String| DriverError::Setup { index, reason };

        let pin = *self
            .pins
            .get(index)
            .ok_or_else(|| setup_error("no pin mapped to this channel".to_string()))?;
        let mut output = self
            .gpio
            .get(pin)
            .map_err(|e| setup_error(e.to_string()))?
            .into_output_low();

        if capability == Capability::Analog {
            output
                .set_pwm_frequency(PWM_FREQUENCY_HZ, 0.0)
                .map_err(|e| setup_error(e.to_string()))?;
        }

        tracing::debug!("GPIO{} set up as {:?} channel {}", pin, capability, index);
        self.outputs[index] = Some(output);
        Ok(())
    }

    fn write_digital(&mut self, index: usize, on: bool) -> Result<(), DriverError> {
        let output = self.output(index)?;
        if on {
            output.set_high();
        } else {
            output.set_low();
        }
        Ok(())
    }

    fn write_analog(&mut self, index: usize, duty: f32) -> Result<(), DriverError> {
        self.output(index)?
            .set_pwm_frequency(PWM_FREQUENCY_HZ, f64::from(duty) / 100.0)
            .map_err(|e| DriverError::Write {
                index,
                reason: e.to_string(),
            })
    }

    fn teardown(&mut self) -> Result<(), DriverError> {
        for output in self.outputs.iter_mut().flatten() {
            output
                .clear_pwm()
                .map_err(|e| DriverError::Teardown(e.to_string()))?;
            output.set_low();
        }
        // Dropping the pins restores their previous mode.
        self.outputs.clear();
        tracing::info!("GPIO released");
        Ok(())
    }
}
