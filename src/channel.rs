//! Channel state model: the set of outputs and their current levels.
//!
//! A [`ChannelSet`] owns both the stored level of every channel and the
//! output driver. Every successful mutation is written to the driver before
//! the call returns, so stored state and hardware never drift apart.
//!
//! ## Rust concepts
//! - Enums with data (`Level`) make invalid states unrepresentable: a Digital
//!   channel simply has nowhere to keep a duty cycle
//! - Interior mutability with `Mutex` so `&ChannelSet` can be shared across
//!   threads through an `Arc`
//! - `#[must_use]` on outcomes the caller should look at

use crate::driver::OutputDriver;
use crate::error::{Diagnostic, DriverError};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Full-on duty cycle for Analog channels.
pub const DUTY_MAX: f32 = 100.0;

// ── Types ──────────────────────────────────────────────────────────

/// What kind of output a channel is wired to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Plain GPIO output: on or off.
    Digital,
    /// PWM-capable output: duty cycle 0-100.
    Analog,
}

/// The current level of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(tag = "capability", content = "value", rename_all = "snake_case")]
pub enum Level {
    Digital(bool),
    Analog(f32),
}

impl Level {
    /// The "off" level for a capability.
    pub fn off(capability: Capability) -> Self {
        match capability {
            Capability::Digital => Level::Digital(false),
            Capability::Analog => Level::Analog(0.0),
        }
    }

    /// On/off for a capability; Analog channels use 100/0.
    pub fn switched(capability: Capability, on: bool) -> Self {
        match capability {
            Capability::Digital => Level::Digital(on),
            Capability::Analog => Level::Analog(if on { DUTY_MAX } else { 0.0 }),
        }
    }

    pub fn capability(self) -> Capability {
        match self {
            Level::Digital(_) => Capability::Digital,
            Level::Analog(_) => Capability::Analog,
        }
    }

    pub fn is_on(self) -> bool {
        match self {
            Level::Digital(on) => on,
            Level::Analog(duty) => duty > 0.0,
        }
    }
}

/// One channel as reported by [`ChannelSet::snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, utoipa::ToSchema)]
pub struct Channel {
    pub index: usize,
    pub level: Level,
}

/// A single mutation inside a pattern frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChannelOp {
    /// Capability-agnostic on/off.
    Switch(usize, bool),
    /// Duty cycle for an Analog channel.
    Duty(usize, f32),
}

/// Result of a single-channel write that did not hit a driver failure.
#[must_use]
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// The level changed and the driver was written.
    Applied,
    /// The channel already had this level; the driver was not touched.
    Unchanged,
    /// The request was ignored.
    Ignored(Diagnostic),
}

/// Clamp a requested duty cycle into `[0, 100]`. NaN becomes 0.
pub fn clamp_duty(duty: f32) -> f32 {
    if duty.is_nan() {
        0.0
    } else {
        duty.clamp(0.0, DUTY_MAX)
    }
}

// ── ChannelSet ─────────────────────────────────────────────────────

struct Inner {
    levels: Vec<Level>,
    driver: Box<dyn OutputDriver>,
}

impl Inner {
    /// Store `level` at `index` and forward it to the driver, skipping
    /// writes that would not change anything. The caller has already checked
    /// the index and capability.
    fn write(&mut self, index: usize, level: Level) -> Result<WriteOutcome, DriverError> {
        if self.levels[index] == level {
            return Ok(WriteOutcome::Unchanged);
        }
        match level {
            Level::Digital(on) => self.driver.write_digital(index, on)?,
            Level::Analog(duty) => self.driver.write_analog(index, duty)?,
        }
        self.levels[index] = level;
        Ok(WriteOutcome::Applied)
    }

    fn fill(&mut self, on: bool) -> Result<(), DriverError> {
        for index in 0..self.levels.len() {
            let capability = self.levels[index].capability();
            let _ = self.write(index, Level::switched(capability, on))?;
        }
        Ok(())
    }
}

/// Ordered, fixed-size set of output channels plus the driver behind them.
///
/// All methods take `&self`; the set is shared between the foreground caller
/// and the background pattern thread via `Arc<ChannelSet>`. The lock is held
/// only for the duration of one call, never across a pattern tick.
pub struct ChannelSet {
    capabilities: Vec<Capability>,
    inner: Mutex<Inner>,
}

impl ChannelSet {
    /// Set up every channel on the driver and drive it to "off".
    pub fn new(
        capabilities: &[Capability],
        mut driver: Box<dyn OutputDriver>,
    ) -> Result<Self, DriverError> {
        let mut levels = Vec::with_capacity(capabilities.len());
        for (index, &capability) in capabilities.iter().enumerate() {
            driver.setup_channel(index, capability)?;
            match capability {
                Capability::Digital => driver.write_digital(index, false)?,
                Capability::Analog => driver.write_analog(index, 0.0)?,
            }
            levels.push(Level::off(capability));
        }

        Ok(Self {
            capabilities: capabilities.to_vec(),
            inner: Mutex::new(Inner { levels, driver }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, index: usize, required: Option<Capability>) -> Option<Diagnostic> {
        match self.capabilities.get(index) {
            None => {
                tracing::debug!("ignoring write to out-of-range channel {}", index);
                Some(Diagnostic::IndexOutOfRange {
                    index,
                    len: self.len(),
                })
            }
            Some(&actual) => match required {
                Some(required) if required != actual => {
                    tracing::warn!("channel {} is {:?}, not {:?}", index, actual, required);
                    Some(Diagnostic::CapabilityMismatch { index, required })
                }
                _ => None,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Set a Digital channel. Analog channels are left untouched.
    pub fn set_digital(&self, index: usize, on: bool) -> Result<WriteOutcome, DriverError> {
        if let Some(diagnostic) = self.check(index, Some(Capability::Digital)) {
            return Ok(WriteOutcome::Ignored(diagnostic));
        }
        self.lock().write(index, Level::Digital(on))
    }

    /// Set the duty cycle of an Analog channel, clamped to `[0, 100]`.
    pub fn set_analog(&self, index: usize, duty: f32) -> Result<WriteOutcome, DriverError> {
        if let Some(diagnostic) = self.check(index, Some(Capability::Analog)) {
            return Ok(WriteOutcome::Ignored(diagnostic));
        }
        self.lock().write(index, Level::Analog(clamp_duty(duty)))
    }

    /// Turn any channel on or off. Analog channels go to 100 or 0.
    pub fn switch(&self, index: usize, on: bool) -> Result<WriteOutcome, DriverError> {
        if let Some(diagnostic) = self.check(index, None) {
            return Ok(WriteOutcome::Ignored(diagnostic));
        }
        let level = Level::switched(self.capabilities[index], on);
        self.lock().write(index, level)
    }

    pub fn all_on(&self) -> Result<(), DriverError> {
        self.lock().fill(true)
    }

    pub fn all_off(&self) -> Result<(), DriverError> {
        self.lock().fill(false)
    }

    /// Apply a list of ops in order, taking the lock once per op.
    pub fn apply(&self, ops: &[ChannelOp]) -> Result<(), DriverError> {
        for &op in ops {
            self.apply_op(op)?;
        }
        Ok(())
    }

    /// Apply one op under its own lock acquisition, so another caller waits
    /// for at most one driver write.
    ///
    /// Ops that target a missing channel, or a `Duty` op on a Digital channel,
    /// are skipped; pattern sequences are built against this set's
    /// capabilities so that only happens if the caller mixed up sets.
    pub fn apply_op(&self, op: ChannelOp) -> Result<(), DriverError> {
        let (index, level) = match op {
            ChannelOp::Switch(index, on) => match self.capabilities.get(index) {
                Some(&capability) => (index, Level::switched(capability, on)),
                None => return Ok(()),
            },
            ChannelOp::Duty(index, duty) => match self.capabilities.get(index) {
                Some(Capability::Analog) => (index, Level::Analog(clamp_duty(duty))),
                _ => return Ok(()),
            },
        };
        let _ = self.lock().write(index, level)?;
        Ok(())
    }

    pub fn level(&self, index: usize) -> Option<Level> {
        self.lock().levels.get(index).copied()
    }

    pub fn is_on(&self, index: usize) -> Option<bool> {
        self.level(index).map(Level::is_on)
    }

    pub fn snapshot(&self) -> Vec<Channel> {
        self.lock()
            .levels
            .iter()
            .enumerate()
            .map(|(index, &level)| Channel { index, level })
            .collect()
    }

    /// Release the driver. The set should already be all-off.
    pub fn teardown(&self) -> Result<(), DriverError> {
        self.lock().driver.teardown()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverEvent, DriverLog, SimulatedDriver};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use Capability::{Analog, Digital};

    fn channel_set(capabilities: &[Capability]) -> (ChannelSet, DriverLog) {
        let driver = SimulatedDriver::new();
        let log = driver.log();
        let set = ChannelSet::new(capabilities, Box::new(driver)).unwrap();
        log.clear();
        (set, log)
    }

    #[test]
    fn new_sets_up_every_channel_off() {
        let driver = SimulatedDriver::new();
        let log = driver.log();
        let set = ChannelSet::new(&[Digital, Analog], Box::new(driver)).unwrap();

        assert_eq!(
            log.events(),
            vec![
                DriverEvent::Setup(0, Digital),
                DriverEvent::Digital(0, false),
                DriverEvent::Setup(1, Analog),
                DriverEvent::Analog(1, 0.0),
            ]
        );
        assert_eq!(set.level(0), Some(Level::Digital(false)));
        assert_eq!(set.level(1), Some(Level::Analog(0.0)));
    }

    #[rstest]
    #[case(0, true)]
    #[case(0, false)]
    #[case(2, true)]
    fn set_digital_then_read(#[case] index: usize, #[case] on: bool) {
        let (set, _) = channel_set(&[Digital, Digital, Digital]);
        let _ = set.set_digital(index, on).unwrap();
        assert_eq!(set.is_on(index), Some(on));
    }

    #[test]
    fn repeated_write_is_idempotent_and_skips_the_driver() {
        let (set, log) = channel_set(&[Digital]);

        assert_eq!(set.set_digital(0, true).unwrap(), WriteOutcome::Applied);
        assert_eq!(set.set_digital(0, true).unwrap(), WriteOutcome::Unchanged);

        assert_eq!(set.level(0), Some(Level::Digital(true)));
        assert_eq!(log.writes_to(0), vec![DriverEvent::Digital(0, true)]);
    }

    #[rstest]
    #[case(50.0, 50.0)]
    #[case(-10.0, 0.0)]
    #[case(150.0, 100.0)]
    #[case(0.0, 0.0)]
    #[case(100.0, 100.0)]
    #[case(f32::NAN, 0.0)]
    fn set_analog_clamps(#[case] requested: f32, #[case] expected: f32) {
        let (set, _) = channel_set(&[Analog]);
        let _ = set.set_analog(0, requested).unwrap();
        assert_eq!(set.level(0), Some(Level::Analog(expected)));
    }

    #[test]
    fn analog_write_on_digital_channel_is_reported() {
        let (set, log) = channel_set(&[Digital]);
        let _ = set.set_digital(0, true).unwrap();
        log.clear();

        let outcome = set.set_analog(0, 40.0).unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Ignored(Diagnostic::CapabilityMismatch {
                index: 0,
                required: Analog,
            })
        );
        assert_eq!(set.level(0), Some(Level::Digital(true)));
        assert!(log.events().is_empty());
    }

    #[test]
    fn digital_write_on_analog_channel_is_reported() {
        let (set, _) = channel_set(&[Analog]);
        let outcome = set.set_digital(0, true).unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Ignored(Diagnostic::CapabilityMismatch {
                index: 0,
                required: Digital,
            })
        );
        assert_eq!(set.level(0), Some(Level::Analog(0.0)));
    }

    #[rstest]
    #[case(3)]
    #[case(100)]
    fn out_of_range_index_is_ignored(#[case] index: usize) {
        let (set, log) = channel_set(&[Digital, Digital, Analog]);

        assert_eq!(
            set.switch(index, true).unwrap(),
            WriteOutcome::Ignored(Diagnostic::IndexOutOfRange { index, len: 3 })
        );
        assert!(log.events().is_empty());
        assert_eq!(set.level(index), None);
    }

    #[test]
    fn all_on_and_all_off_cover_both_capabilities() {
        let (set, _) = channel_set(&[Digital, Digital, Analog]);

        set.all_on().unwrap();
        assert_eq!(
            set.snapshot().iter().map(|c| c.level).collect::<Vec<_>>(),
            vec![
                Level::Digital(true),
                Level::Digital(true),
                Level::Analog(100.0),
            ]
        );

        set.all_off().unwrap();
        assert!(set.snapshot().iter().all(|c| !c.level.is_on()));
    }

    #[test]
    fn switch_maps_analog_to_full_duty() {
        let (set, _) = channel_set(&[Analog]);
        let _ = set.switch(0, true).unwrap();
        assert_eq!(set.level(0), Some(Level::Analog(100.0)));
    }

    #[test]
    fn apply_skips_ops_that_do_not_fit() {
        let (set, log) = channel_set(&[Digital, Analog]);

        set.apply(&[
            ChannelOp::Switch(0, true),
            ChannelOp::Duty(0, 50.0),
            ChannelOp::Duty(1, 120.0),
            ChannelOp::Switch(7, true),
        ])
        .unwrap();

        assert_eq!(set.level(0), Some(Level::Digital(true)));
        assert_eq!(set.level(1), Some(Level::Analog(100.0)));
        assert_eq!(
            log.events(),
            vec![DriverEvent::Digital(0, true), DriverEvent::Analog(1, 100.0)]
        );
    }
}
