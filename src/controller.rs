//! Controller: the one object callers talk to.
//!
//! Composes a [`ChannelSet`] and a [`PatternEngine`] and forwards every call.
//! It holds no state of its own beyond that composition.

use crate::ChannelLayout;
use crate::channel::{Channel, ChannelSet, WriteOutcome};
use crate::driver::OutputDriver;
use crate::engine::{EngineState, PatternEngine, StartReport, StopStatus};
use crate::error::{Diagnostic, DriverError};
use crate::pattern::{Mode, ModeParams, PatternRequest};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of the controller for status reporting.
#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ControllerStatus {
    /// Engine lifecycle state
    pub state: EngineState,
    /// Name of the running pattern, if any
    pub pattern: Option<String>,
    /// Every channel with its current level
    pub channels: Vec<Channel>,
    /// Server version
    pub version: String,
}

pub struct Controller {
    channels: Arc<ChannelSet>,
    engine: PatternEngine,
}

impl Controller {
    /// Set up every channel in `layout` on `driver`, all off.
    pub fn new(
        layout: &ChannelLayout,
        driver: Box<dyn OutputDriver>,
        stop_timeout: Duration,
    ) -> Result<Self, DriverError> {
        let channels = Arc::new(ChannelSet::new(&layout.capabilities(), driver)?);
        let engine = PatternEngine::new(channels.clone(), stop_timeout);
        tracing::info!(
            "LED controller initialized: {} digital, {} PWM channels",
            layout.digital_pins().len(),
            layout.pwm_pins().len()
        );
        Ok(Self { channels, engine })
    }

    /// Turn one channel on or off. PWM channels go to full or zero duty.
    pub fn set_channel(&self, index: usize, on: bool) -> Result<WriteOutcome, DriverError> {
        self.channels.switch(index, on)
    }

    /// Set the duty cycle (clamped to 0-100) of a PWM channel.
    pub fn set_brightness(&self, index: usize, duty: f32) -> Result<WriteOutcome, DriverError> {
        self.channels.set_analog(index, duty)
    }

    pub fn all_on(&self) -> Result<(), DriverError> {
        self.channels.all_on()
    }

    pub fn all_off(&self) -> Result<(), DriverError> {
        self.channels.all_off()
    }

    /// Start one of the numbered menu modes (0-6).
    pub fn start_mode(&mut self, code: u8, params: &ModeParams) -> Result<StartReport, Diagnostic> {
        let mode = Mode::try_from(code)?;
        let request = PatternRequest::from_mode(mode, params)?;
        self.start(request)
    }

    /// Start any pattern, including those without a menu number.
    pub fn start(&mut self, request: PatternRequest) -> Result<StartReport, Diagnostic> {
        self.engine.start(request)
    }

    pub fn stop(&mut self) -> Result<StopStatus, DriverError> {
        self.engine.stop()
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn status(&mut self) -> ControllerStatus {
        ControllerStatus {
            state: self.engine.state(),
            pattern: self.engine.current_pattern().map(str::to_string),
            channels: self.channels.snapshot(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Stop any pattern, switch everything off and release the driver.
    pub fn shutdown(&mut self) -> Result<StopStatus, DriverError> {
        let status = self.engine.stop()?;
        self.channels.teardown()?;
        tracing::info!("LED controller stopped and cleaned up");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Capability, Level};
    use crate::driver::{DriverEvent, DriverLog, SimulatedDriver};
    use crate::engine::TaskOutcome;
    use crate::pattern::Pattern;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn controller(digital: &[u8], pwm: &[u8]) -> (Controller, DriverLog) {
        let layout = ChannelLayout::from_pins(digital, pwm).unwrap();
        let driver = SimulatedDriver::new();
        let log = driver.log();
        let controller =
            Controller::new(&layout, Box::new(driver), Duration::from_millis(500)).unwrap();
        (controller, log)
    }

    #[test]
    fn three_digital_channels_all_on_then_all_off() {
        let (c, _) = controller(&[18, 19, 20], &[]);

        c.all_on().unwrap();
        assert!((0..3).all(|i| c.channels().is_on(i) == Some(true)));

        c.all_off().unwrap();
        assert!((0..3).all(|i| c.channels().is_on(i) == Some(false)));
    }

    #[rstest]
    #[case(0, true)]
    #[case(1, false)]
    #[case(3, true)]
    fn set_channel_reads_back(#[case] index: usize, #[case] on: bool) {
        // Index 3 is the PWM channel.
        let (c, _) = controller(&[18, 19, 20], &[12]);
        let _ = c.set_channel(index, !on).unwrap();
        let _ = c.set_channel(index, on).unwrap();
        assert_eq!(c.channels().is_on(index), Some(on));
    }

    #[rstest]
    #[case(42.5, 42.5)]
    #[case(-3.0, 0.0)]
    #[case(250.0, 100.0)]
    fn set_brightness_clamps(#[case] requested: f32, #[case] expected: f32) {
        let (c, _) = controller(&[18], &[12]);
        let _ = c.set_brightness(1, requested).unwrap();
        assert_eq!(c.channels().level(1), Some(Level::Analog(expected)));
    }

    #[test]
    fn brightness_on_digital_channel_is_a_diagnostic() {
        let (c, log) = controller(&[18], &[12]);
        let _ = c.set_channel(0, true).unwrap();
        log.clear();

        let outcome = c.set_brightness(0, 30.0).unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Ignored(Diagnostic::CapabilityMismatch {
                index: 0,
                required: Capability::Analog,
            })
        );
        assert_eq!(c.channels().is_on(0), Some(true));
        assert!(log.events().is_empty());
    }

    #[test]
    fn invalid_mode_is_reported() {
        let (mut c, _) = controller(&[18, 19], &[]);
        assert_eq!(
            c.start_mode(9, &ModeParams::default()).unwrap_err(),
            Diagnostic::InvalidMode(9)
        );
        assert_eq!(c.status().state, EngineState::Idle);
    }

    #[test]
    fn mode_one_turns_everything_on() {
        let (mut c, _) = controller(&[18, 19], &[12]);
        let report = c.start_mode(1, &ModeParams::default()).unwrap();
        assert_eq!(report.pattern, "all-on");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while c.status().state != EngineState::Idle && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(c.status().channels.iter().all(|ch| ch.level.is_on()));
    }

    #[test]
    fn stop_turns_everything_off() {
        let (mut c, _) = controller(&[18, 19, 20], &[12, 13]);
        c.start(PatternRequest::new(Pattern::Blink).with_interval(Duration::from_millis(5)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let status = c.stop().unwrap();

        assert_eq!(status, StopStatus::Stopped(TaskOutcome::Cancelled));
        assert!(c.status().channels.iter().all(|ch| !ch.level.is_on()));
    }

    #[test]
    fn status_reports_running_pattern() {
        let (mut c, _) = controller(&[18, 19], &[]);
        c.start_mode(3, &ModeParams::default()).unwrap();

        let status = c.status();
        assert_eq!(status.state, EngineState::Active);
        assert_eq!(status.pattern.as_deref(), Some("chase"));
        assert_eq!(status.channels.len(), 2);
        c.stop().unwrap();
    }

    #[test]
    fn shutdown_tears_down_the_driver_last() {
        let (mut c, log) = controller(&[18], &[12]);
        c.start_mode(2, &ModeParams::default()).unwrap();

        let status = c.shutdown().unwrap();

        assert_eq!(status, StopStatus::Stopped(TaskOutcome::Cancelled));
        assert_eq!(log.events().last(), Some(&DriverEvent::Teardown));
    }
}
