//! Pattern library: every light show as a lazy sequence of frames.
//!
//! A pattern never sleeps or touches the hardware itself. Instead it is an
//! `Iterator` that yields [`Frame`]s: the channel operations for one tick and
//! how long to hold them. The engine pulls frames, applies them to the
//! [`ChannelSet`](crate::channel::ChannelSet) and sleeps for the hold time.
//! That keeps every pattern a pure state machine that is trivial to test and
//! restartable (building a new sequence starts from scratch).
//!
//! ## Rust concepts
//! - Implementing `Iterator` for small state-machine structs
//! - An enum (`Sequence`) wrapping several iterator types so one concrete
//!   type can be returned without boxing
//! - `TryFrom` for validated conversions (`u8` → `Mode`)
//! - Serde internally-tagged enums (`#[serde(tag = "kind")]`)

use crate::channel::{Capability, ChannelOp};
use crate::error::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of duty steps per fade direction (0..=100).
pub const FADE_STEPS: u32 = 101;

/// Fade duration used when the request does not give one.
pub const DEFAULT_FADE_DURATION: Duration = Duration::from_secs(2);

// ── Requests ───────────────────────────────────────────────────────

/// Which routine to run, with the parameters only that routine needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    /// Turn everything off once.
    AllOff,
    /// Turn everything on once.
    AllOn,
    /// Alternate all-on and all-off.
    Blink,
    /// One lit channel walking up the set.
    Chase,
    /// A bouncing light with a dimmed trail.
    KnightRider,
    /// Ramp one Analog channel up and back down.
    Fade { channel: usize },
    /// Replay a fixed list of on/off frames.
    Display { frames: Vec<Vec<bool>> },
    /// Show a binary count, channel 0 being the least significant bit.
    BinaryCounter {
        #[serde(default)]
        max_count: Option<u64>,
    },
    /// Cycle the first three Analog channels around the color wheel.
    Rainbow,
    /// Every channel on or off at random each tick.
    RandomBlink,
}

impl Pattern {
    pub fn name(&self) -> &'static str {
        match self {
            Pattern::AllOff => "all-off",
            Pattern::AllOn => "all-on",
            Pattern::Blink => "blink",
            Pattern::Chase => "chase",
            Pattern::KnightRider => "knight-rider",
            Pattern::Fade { .. } => "fade",
            Pattern::Display { .. } => "display",
            Pattern::BinaryCounter { .. } => "binary-counter",
            Pattern::Rainbow => "rainbow",
            Pattern::RandomBlink => "random-blink",
        }
    }

    /// Tick length used when the caller does not pick one.
    pub fn default_interval(&self) -> Duration {
        match self {
            Pattern::Blink | Pattern::BinaryCounter { .. } | Pattern::Display { .. } => {
                Duration::from_millis(500)
            }
            Pattern::Chase => Duration::from_millis(200),
            Pattern::KnightRider | Pattern::RandomBlink => Duration::from_millis(100),
            Pattern::Rainbow => Duration::from_millis(50),
            // One-shot patterns and fade do not use the interval for pacing.
            Pattern::AllOff | Pattern::AllOn | Pattern::Fade { .. } => Duration::from_millis(100),
        }
    }
}

/// A pattern plus its pacing.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternRequest {
    pub pattern: Pattern,
    /// Time between ticks. Must be non-zero.
    pub interval: Duration,
    /// Total run time. `None` runs until stopped (or until a finite pattern
    /// ends on its own). For `Fade` this is the length of the whole ramp.
    pub duration: Option<Duration>,
}

impl PatternRequest {
    /// A request with the pattern's default interval and no time limit.
    pub fn new(pattern: Pattern) -> Self {
        let interval = pattern.default_interval();
        Self {
            pattern,
            interval,
            duration: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Apply optional pacing given in seconds, as received from the menu or
    /// the HTTP API. A positive infinite duration means "unbounded".
    pub fn with_secs(
        mut self,
        interval: Option<f64>,
        duration: Option<f64>,
    ) -> Result<Self, Diagnostic> {
        if let Some(secs) = interval {
            self.interval = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .ok_or(Diagnostic::InvalidInterval)?;
        }
        if let Some(secs) = duration {
            self.duration = if secs == f64::INFINITY {
                None
            } else {
                Some(Duration::try_from_secs_f64(secs).map_err(|_| Diagnostic::InvalidDuration)?)
            };
        }
        Ok(self)
    }

    /// Build a request from a numbered menu mode and its optional parameters.
    pub fn from_mode(mode: Mode, params: &ModeParams) -> Result<Self, Diagnostic> {
        let pattern = match mode {
            Mode::Off => Pattern::AllOff,
            Mode::On => Pattern::AllOn,
            Mode::Blink => Pattern::Blink,
            Mode::Chase => Pattern::Chase,
            Mode::KnightRider => Pattern::KnightRider,
            Mode::BinaryCounter => Pattern::BinaryCounter {
                max_count: params.max_count,
            },
            Mode::RandomBlink => Pattern::RandomBlink,
        };
        Self::new(pattern).with_secs(params.interval, params.duration)
    }

    /// Check the request against the channel layout it will run on.
    pub fn validate(&self, capabilities: &[Capability]) -> Result<(), Diagnostic> {
        if self.interval.is_zero() {
            return Err(Diagnostic::InvalidInterval);
        }
        match self.pattern {
            Pattern::Fade { channel } => match capabilities.get(channel) {
                None => Err(Diagnostic::IndexOutOfRange {
                    index: channel,
                    len: capabilities.len(),
                }),
                Some(Capability::Digital) => Err(Diagnostic::CapabilityMismatch {
                    index: channel,
                    required: Capability::Analog,
                }),
                Some(Capability::Analog) => Ok(()),
            },
            Pattern::Rainbow if !capabilities.contains(&Capability::Analog) => {
                Err(Diagnostic::NoAnalogChannels)
            }
            _ => Ok(()),
        }
    }

    /// How long the engine lets this request run, if bounded.
    ///
    /// A fade uses its duration to size the ramp instead, so it always runs
    /// its full sequence.
    pub fn time_limit(&self) -> Option<Duration> {
        match self.pattern {
            Pattern::Fade { .. } => None,
            _ => self.duration,
        }
    }

    /// Select and build the routine for this request.
    pub fn sequence(&self, capabilities: &[Capability]) -> Sequence {
        let n = capabilities.len();
        let hold = self.interval;
        match &self.pattern {
            Pattern::AllOff => Sequence::Once(Some(switch_all(n, false, Duration::ZERO))),
            Pattern::AllOn => Sequence::Once(Some(switch_all(n, true, Duration::ZERO))),
            Pattern::Blink => Sequence::Blink(Blink::new(n, hold)),
            Pattern::Chase => Sequence::Chase(Chase::new(n, hold)),
            Pattern::KnightRider => Sequence::KnightRider(KnightRider::new(capabilities, hold)),
            Pattern::Fade { channel } => Sequence::Fade(Fade::new(
                *channel,
                self.duration.unwrap_or(DEFAULT_FADE_DURATION),
            )),
            Pattern::Display { frames } => {
                Sequence::Display(Display::new(frames.clone(), n, hold))
            }
            Pattern::BinaryCounter { max_count } => {
                Sequence::BinaryCounter(BinaryCounter::new(n, *max_count, hold))
            }
            Pattern::Rainbow => Sequence::Rainbow(Rainbow::new(capabilities, hold)),
            Pattern::RandomBlink => {
                Sequence::RandomBlink(RandomBlink::new(n, hold, fastrand::Rng::new()))
            }
        }
    }
}

// ── Menu modes ─────────────────────────────────────────────────────

/// The numbered modes offered by the interactive menu and `POST /api/v1/mode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Off = 0,
    On = 1,
    Blink = 2,
    Chase = 3,
    KnightRider = 4,
    BinaryCounter = 5,
    RandomBlink = 6,
}

impl Mode {
    pub const ALL: [Mode; 7] = [
        Mode::Off,
        Mode::On,
        Mode::Blink,
        Mode::Chase,
        Mode::KnightRider,
        Mode::BinaryCounter,
        Mode::RandomBlink,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Mode::Off => "All Off",
            Mode::On => "All On",
            Mode::Blink => "Blink All",
            Mode::Chase => "Chase Sequence",
            Mode::KnightRider => "Knight Rider",
            Mode::BinaryCounter => "Binary Counter",
            Mode::RandomBlink => "Random Blink",
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = Diagnostic;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Mode::ALL
            .get(usize::from(code))
            .copied()
            .ok_or(Diagnostic::InvalidMode(code))
    }
}

/// Optional overrides for a numbered mode. Times are in seconds.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, utoipa::ToSchema)]
pub struct ModeParams {
    /// Seconds between ticks
    #[schema(example = 0.2)]
    pub interval: Option<f64>,
    /// Seconds to run before stopping on its own
    pub duration: Option<f64>,
    /// Highest value shown by the binary counter
    pub max_count: Option<u64>,
}

// ── Frames and sequences ───────────────────────────────────────────

/// The work for one tick: what to write, then how long to hold it.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub ops: Vec<ChannelOp>,
    pub hold: Duration,
}

fn switch_all(n: usize, on: bool, hold: Duration) -> Frame {
    Frame {
        ops: (0..n).map(|i| ChannelOp::Switch(i, on)).collect(),
        hold,
    }
}

/// Any pattern routine, as one concrete iterator type.
pub enum Sequence {
    Once(Option<Frame>),
    Blink(Blink),
    Chase(Chase),
    KnightRider(KnightRider),
    Fade(Fade),
    Display(Display),
    BinaryCounter(BinaryCounter),
    Rainbow(Rainbow),
    RandomBlink(RandomBlink),
}

impl Iterator for Sequence {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self {
            Sequence::Once(frame) => frame.take(),
            Sequence::Blink(s) => s.next(),
            Sequence::Chase(s) => s.next(),
            Sequence::KnightRider(s) => s.next(),
            Sequence::Fade(s) => s.next(),
            Sequence::Display(s) => s.next(),
            Sequence::BinaryCounter(s) => s.next(),
            Sequence::Rainbow(s) => s.next(),
            Sequence::RandomBlink(s) => s.next(),
        }
    }
}

/// All on, all off, repeat.
pub struct Blink {
    n: usize,
    on: bool,
    hold: Duration,
}

impl Blink {
    pub fn new(n: usize, hold: Duration) -> Self {
        Self { n, on: true, hold }
    }
}

impl Iterator for Blink {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let frame = switch_all(self.n, self.on, self.hold);
        self.on = !self.on;
        Some(frame)
    }
}

/// Exactly channel `tick mod n` is on.
pub struct Chase {
    n: usize,
    position: usize,
    hold: Duration,
}

impl Chase {
    pub fn new(n: usize, hold: Duration) -> Self {
        Self {
            n,
            position: 0,
            hold,
        }
    }
}

impl Iterator for Chase {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.n == 0 {
            return None;
        }
        let lit = self.position;
        self.position = (self.position + 1) % self.n;
        Some(Frame {
            ops: (0..self.n).map(|i| ChannelOp::Switch(i, i == lit)).collect(),
            hold: self.hold,
        })
    }
}

/// Bouncing scanner. Analog channels get a dimmed trail.
pub struct KnightRider {
    capabilities: Vec<Capability>,
    position: usize,
    forward: bool,
    hold: Duration,
}

impl KnightRider {
    pub fn new(capabilities: &[Capability], hold: Duration) -> Self {
        Self {
            capabilities: capabilities.to_vec(),
            position: 0,
            forward: true,
            hold,
        }
    }

    fn op(&self, index: usize, capability: Capability) -> ChannelOp {
        match (index.abs_diff(self.position), capability) {
            (0, _) => ChannelOp::Switch(index, true),
            (1, Capability::Analog) => ChannelOp::Duty(index, 50.0),
            (1, Capability::Digital) => ChannelOp::Switch(index, true),
            (2, Capability::Analog) => ChannelOp::Duty(index, 20.0),
            _ => ChannelOp::Switch(index, false),
        }
    }
}

impl Iterator for KnightRider {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let n = self.capabilities.len();
        if n == 0 {
            return None;
        }
        let ops = self
            .capabilities
            .iter()
            .enumerate()
            .map(|(i, &capability)| self.op(i, capability))
            .collect();

        if n > 1 {
            if self.forward {
                self.position += 1;
            } else {
                self.position -= 1;
            }
            if self.position == 0 || self.position >= n - 1 {
                self.forward = !self.forward;
            }
        }

        Some(Frame {
            ops,
            hold: self.hold,
        })
    }
}

/// Ramp one Analog channel 0→100→0, `FADE_STEPS` steps each way.
pub struct Fade {
    channel: usize,
    step: u32,
    hold: Duration,
}

impl Fade {
    pub fn new(channel: usize, duration: Duration) -> Self {
        Self {
            channel,
            step: 0,
            hold: duration / (2 * FADE_STEPS),
        }
    }
}

impl Iterator for Fade {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let duty = match self.step {
            s if s < FADE_STEPS => s,
            s if s < 2 * FADE_STEPS => 2 * FADE_STEPS - 1 - s,
            _ => return None,
        };
        self.step += 1;
        Some(Frame {
            ops: vec![ChannelOp::Duty(self.channel, duty as f32)],
            hold: self.hold,
        })
    }
}

/// Replays caller-supplied frames once.
pub struct Display {
    frames: std::vec::IntoIter<Vec<bool>>,
    n: usize,
    hold: Duration,
}

impl Display {
    pub fn new(frames: Vec<Vec<bool>>, n: usize, hold: Duration) -> Self {
        Self {
            frames: frames.into_iter(),
            n,
            hold,
        }
    }
}

impl Iterator for Display {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let states = self.frames.next()?;
        Some(Frame {
            ops: states
                .into_iter()
                .take(self.n)
                .enumerate()
                .map(|(i, on)| ChannelOp::Switch(i, on))
                .collect(),
            hold: self.hold,
        })
    }
}

/// Counts 0..=max in binary across the channels.
pub struct BinaryCounter {
    n: usize,
    count: u64,
    max: u64,
    done: bool,
    hold: Duration,
}

impl BinaryCounter {
    /// `max_count` defaults to the largest value the channels can show.
    pub fn new(n: usize, max_count: Option<u64>, hold: Duration) -> Self {
        let full_scale = if n >= 64 { u64::MAX } else { (1u64 << n) - 1 };
        Self {
            n,
            count: 0,
            max: max_count.unwrap_or(full_scale),
            done: false,
            hold,
        }
    }
}

impl Iterator for BinaryCounter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }
        let count = self.count;
        let ops = (0..self.n)
            .map(|i| ChannelOp::Switch(i, i < 64 && (count >> i) & 1 == 1))
            .collect();

        if count >= self.max {
            self.done = true;
        } else {
            self.count += 1;
        }

        Some(Frame {
            ops,
            hold: self.hold,
        })
    }
}

/// Color-wheel fade over up to three Analog channels, 120° apart.
pub struct Rainbow {
    channels: Vec<usize>,
    hue: u16,
    hold: Duration,
}

impl Rainbow {
    pub fn new(capabilities: &[Capability], hold: Duration) -> Self {
        let channels = capabilities
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Capability::Analog)
            .map(|(i, _)| i)
            .take(3)
            .collect();
        Self {
            channels,
            hue: 0,
            hold,
        }
    }

    /// Duty for the `slot`-th color channel at `hue` degrees.
    pub fn duty(hue: u16, slot: usize) -> f32 {
        let phase = (u32::from(hue) + 120 * slot as u32) % 360;
        (50.0 * (1.0 + f64::from(phase).to_radians().cos())) as f32
    }
}

impl Iterator for Rainbow {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.channels.is_empty() {
            return None;
        }
        let ops = self
            .channels
            .iter()
            .enumerate()
            .map(|(slot, &index)| ChannelOp::Duty(index, Self::duty(self.hue, slot)))
            .collect();
        self.hue = (self.hue + 1) % 360;
        Some(Frame {
            ops,
            hold: self.hold,
        })
    }
}

/// Coin flip per channel per tick.
pub struct RandomBlink {
    n: usize,
    rng: fastrand::Rng,
    hold: Duration,
}

impl RandomBlink {
    pub fn new(n: usize, hold: Duration, rng: fastrand::Rng) -> Self {
        Self { n, rng, hold }
    }
}

impl Iterator for RandomBlink {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        Some(Frame {
            ops: (0..self.n)
                .map(|i| ChannelOp::Switch(i, self.rng.bool()))
                .collect(),
            hold: self.hold,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────
