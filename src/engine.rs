//! Pattern engine: runs at most one pattern at a time on a background thread.
//!
//! Each call to [`PatternEngine::start`] spawns a plain `std::thread` that
//! pulls frames from the pattern's sequence, applies them to the shared
//! [`ChannelSet`] and sleeps between ticks. Starting a new pattern first asks
//! the old one to stop and waits a bounded time for it. A task that does not
//! finish in time is abandoned (detached), and the caller is told so through
//! [`StopStatus::Abandoned`].
//!
//! ## Rust concepts
//! - A per-task cancellation token built from `Arc<(Mutex<bool>, Condvar)>`
//! - `mpsc::sync_channel` + `recv_timeout()` as a join-with-timeout
//! - Dropping a `JoinHandle` detaches the thread instead of killing it
//! - `impl Drop` to signal cancellation when the engine goes away

use crate::channel::ChannelSet;
use crate::error::{Diagnostic, DriverError};
use crate::pattern::PatternRequest;
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long `start`/`stop` wait for the previous task before abandoning it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

// ── Cancellation ───────────────────────────────────────────────────

/// Cooperative cancellation signal for one task.
///
/// Cloning shares the same flag. The pattern thread checks it at every tick
/// and sleeps on it, so a cancelled task wakes up immediately instead of
/// finishing its current interval.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` or until cancelled. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wake
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ── Status types ───────────────────────────────────────────────────

/// Identifier of one started task, increasing from 1.
pub type TaskId = u64;

/// How a pattern task ended.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    /// A finite pattern ran all its frames.
    Completed,
    /// The requested duration ran out.
    Expired,
    /// The engine asked it to stop.
    Cancelled,
    /// The driver failed; the task ended at that write.
    Failed(DriverError),
    /// The thread ended without reporting an outcome.
    Panicked,
}

/// What happened to the previous task when the engine stopped it.
#[derive(Clone, Debug, PartialEq)]
pub enum StopStatus {
    /// Nothing was running.
    NotRunning,
    /// The task is finished and joined.
    Stopped(TaskOutcome),
    /// The task did not finish within the stop timeout and was detached.
    ///
    /// A task can only overrun while blocked in a driver write. `stop` then
    /// waits for that one write before switching everything off, so it
    /// returns within the stop timeout plus one write.
    Abandoned,
}

impl StopStatus {
    pub fn is_abandoned(&self) -> bool {
        matches!(self, StopStatus::Abandoned)
    }
}

/// Lifecycle state of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Active,
    Stopping,
}

/// Returned by a successful [`PatternEngine::start`].
#[derive(Clone, Debug, PartialEq)]
pub struct StartReport {
    pub task: TaskId,
    pub pattern: &'static str,
    /// What happened to the task that was running before.
    pub previous: StopStatus,
}

struct RunningTask {
    id: TaskId,
    pattern: &'static str,
    cancel: CancelToken,
    done: Receiver<TaskOutcome>,
    handle: JoinHandle<()>,
    /// Set once the outcome has been received by `poll`.
    outcome: Option<TaskOutcome>,
}

// ── Engine ─────────────────────────────────────────────────────────

/// Lifecycle manager for pattern tasks on one [`ChannelSet`].
pub struct PatternEngine {
    channels: Arc<ChannelSet>,
    stop_timeout: Duration,
    state: EngineState,
    task: Option<RunningTask>,
    next_id: TaskId,
}

impl PatternEngine {
    pub fn new(channels: Arc<ChannelSet>, stop_timeout: Duration) -> Self {
        Self {
            channels,
            stop_timeout,
            state: EngineState::Idle,
            task: None,
            next_id: 1,
        }
    }

    /// Current state. A task that ended on its own makes the engine Idle.
    pub fn state(&mut self) -> EngineState {
        self.poll();
        self.state
    }

    /// Name of the pattern currently running, if any.
    pub fn current_pattern(&mut self) -> Option<&'static str> {
        match self.state() {
            EngineState::Idle => None,
            _ => self.task.as_ref().map(|t| t.pattern),
        }
    }

    /// Stop whatever is running and start `request` on a new thread.
    ///
    /// Invalid requests are rejected before anything is stopped.
    pub fn start(&mut self, request: PatternRequest) -> Result<StartReport, Diagnostic> {
        request.validate(self.channels.capabilities())?;

        let previous = self.halt();

        let id = self.next_id;
        self.next_id += 1;
        let pattern = request.pattern.name();
        let cancel = CancelToken::new();
        let (done_tx, done) = mpsc::sync_channel(1);

        let channels = self.channels.clone();
        let task_cancel = cancel.clone();
        let handle = thread::spawn(move || {
            run_task(id, &channels, &request, &task_cancel, done_tx);
        });

        self.task = Some(RunningTask {
            id,
            pattern,
            cancel,
            done,
            handle,
            outcome: None,
        });
        self.state = EngineState::Active;
        tracing::info!("Started pattern {} (task {})", pattern, id);

        Ok(StartReport {
            task: id,
            pattern,
            previous,
        })
    }

    /// Stop the running task (if any) and turn every channel off.
    ///
    /// The channels are switched off even if the task had to be abandoned.
    pub fn stop(&mut self) -> Result<StopStatus, DriverError> {
        let status = self.halt();
        let off = self.channels.all_off();
        self.state = EngineState::Idle;
        off?;
        Ok(status)
    }

    /// Cancel and reap the current task, waiting at most `stop_timeout`.
    fn halt(&mut self) -> StopStatus {
        self.poll();
        let Some(task) = self.task.take() else {
            return StopStatus::NotRunning;
        };

        if let Some(outcome) = task.outcome {
            let _ = task.handle.join();
            return StopStatus::Stopped(outcome);
        }

        self.state = EngineState::Stopping;
        task.cancel.cancel();

        match task.done.recv_timeout(self.stop_timeout) {
            Ok(outcome) => {
                let _ = task.handle.join();
                tracing::info!(
                    "Stopped pattern {} (task {}): {:?}",
                    task.pattern,
                    task.id,
                    outcome
                );
                StopStatus::Stopped(outcome)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Pattern {} (task {}) did not stop within {}ms, abandoning it",
                    task.pattern,
                    task.id,
                    self.stop_timeout.as_millis()
                );
                drop(task.handle);
                StopStatus::Abandoned
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = task.handle.join();
                StopStatus::Stopped(TaskOutcome::Panicked)
            }
        }
    }

    /// Pick up the outcome of a task that finished on its own.
    fn poll(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        if task.outcome.is_none() {
            task.outcome = match task.done.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(TryRecvError::Disconnected) => Some(TaskOutcome::Panicked),
                Err(TryRecvError::Empty) => None,
            };
        }
        if task.outcome.is_some() {
            self.state = EngineState::Idle;
        }
    }
}

impl Drop for PatternEngine {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
    }
}

// ── Task body ──────────────────────────────────────────────────────

fn run_task(
    id: TaskId,
    channels: &ChannelSet,
    request: &PatternRequest,
    cancel: &CancelToken,
    done: SyncSender<TaskOutcome>,
) {
    let outcome = match run_routine(channels, request, cancel) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Pattern {} (task {}) failed: {}", request.pattern.name(), id, e);
            TaskOutcome::Failed(e)
        }
    };
    tracing::debug!("Task {} finished: {:?}", id, outcome);
    // The engine may have abandoned us and dropped the receiver.
    let _ = done.send(outcome);
}

/// Drive one pattern to completion on the calling thread.
///
/// Cancellation is checked before every channel write and the time limit at
/// the top of every tick, so a bounded run may overshoot its duration by up to
/// one tick. A cancelled task never writes after its in-flight op.
pub fn run_routine(
    channels: &ChannelSet,
    request: &PatternRequest,
    cancel: &CancelToken,
) -> Result<TaskOutcome, DriverError> {
    let started = Instant::now();
    let limit = request.time_limit();

    for frame in request.sequence(channels.capabilities()) {
        if cancel.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            return Ok(TaskOutcome::Expired);
        }

        for &op in &frame.ops {
            if cancel.is_cancelled() {
                return Ok(TaskOutcome::Cancelled);
            }
            channels.apply_op(op)?;
        }

        if cancel.sleep(frame.hold) {
            return Ok(TaskOutcome::Cancelled);
        }
    }

    Ok(TaskOutcome::Completed)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Capability, Level};
    use crate::driver::{OutputDriver, SimulatedDriver};
    use crate::pattern::Pattern;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    use Capability::{Analog, Digital};

    const TICK: Duration = Duration::from_millis(5);

    fn channels(capabilities: &[Capability]) -> Arc<ChannelSet> {
        Arc::new(ChannelSet::new(capabilities, Box::new(SimulatedDriver::new())).unwrap())
    }

    fn engine(capabilities: &[Capability]) -> (PatternEngine, Arc<ChannelSet>) {
        let set = channels(capabilities);
        (PatternEngine::new(set.clone(), DEFAULT_STOP_TIMEOUT), set)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn all_off(set: &ChannelSet) -> bool {
        set.snapshot().iter().all(|c| !c.level.is_on())
    }

    /// Sleeps inside every "on" write, holding the channel lock.
    struct StallingDriver {
        stall: Duration,
    }

    impl OutputDriver for StallingDriver {
        fn setup_channel(&mut self, _: usize, _: Capability) -> Result<(), DriverError> {
            Ok(())
        }
        fn write_digital(&mut self, _: usize, on: bool) -> Result<(), DriverError> {
            if on {
                thread::sleep(self.stall);
            }
            Ok(())
        }
        fn write_analog(&mut self, _: usize, _: f32) -> Result<(), DriverError> {
            Ok(())
        }
        fn teardown(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    /// Fails every "on" write.
    struct BrokenDriver;

    impl OutputDriver for BrokenDriver {
        fn setup_channel(&mut self, _: usize, _: Capability) -> Result<(), DriverError> {
            Ok(())
        }
        fn write_digital(&mut self, index: usize, on: bool) -> Result<(), DriverError> {
            if on {
                return Err(DriverError::Write {
                    index,
                    reason: "shorted".to_string(),
                });
            }
            Ok(())
        }
        fn write_analog(&mut self, _: usize, _: f32) -> Result<(), DriverError> {
            Ok(())
        }
        fn teardown(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    /// Fails "off" writes once `fail_off` is set.
    struct OffFailingDriver {
        fail_off: Arc<AtomicBool>,
    }

    impl OutputDriver for OffFailingDriver {
        fn setup_channel(&mut self, _: usize, _: Capability) -> Result<(), DriverError> {
            Ok(())
        }
        fn write_digital(&mut self, index: usize, on: bool) -> Result<(), DriverError> {
            if !on && self.fail_off.load(Ordering::SeqCst) {
                return Err(DriverError::Write {
                    index,
                    reason: "stuck high".to_string(),
                });
            }
            Ok(())
        }
        fn write_analog(&mut self, _: usize, _: f32) -> Result<(), DriverError> {
            Ok(())
        }
        fn teardown(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[test]
    fn cancel_token_wakes_a_sleeper() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(handle.join().unwrap());
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_token_sleep_times_out() {
        let token = CancelToken::new();
        assert!(!token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn stop_when_idle_still_turns_everything_off() {
        let (mut engine, set) = engine(&[Digital, Analog]);
        set.all_on().unwrap();

        assert_eq!(engine.stop().unwrap(), StopStatus::NotRunning);
        assert!(all_off(&set));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn start_then_stop_cancels_cleanly() {
        let (mut engine, set) = engine(&[Digital, Digital, Analog]);

        let report = engine
            .start(PatternRequest::new(Pattern::Blink).with_interval(TICK))
            .unwrap();
        assert_eq!(report.task, 1);
        assert_eq!(report.pattern, "blink");
        assert_eq!(report.previous, StopStatus::NotRunning);
        assert_eq!(engine.state(), EngineState::Active);
        assert_eq!(engine.current_pattern(), Some("blink"));

        thread::sleep(Duration::from_millis(30));
        let status = engine.stop().unwrap();

        assert_eq!(status, StopStatus::Stopped(TaskOutcome::Cancelled));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.current_pattern(), None);
        assert!(all_off(&set));
    }

    #[test]
    fn finite_pattern_completes_on_its_own() {
        let (mut engine, set) = engine(&[Digital, Digital]);
        let request = PatternRequest::new(Pattern::BinaryCounter { max_count: None })
            .with_interval(TICK);
        engine.start(request).unwrap();

        assert!(wait_until(Duration::from_secs(2), || engine.state()
            == EngineState::Idle));
        // Last value shown stays on the channels.
        assert_eq!(set.is_on(0), Some(true));
        assert_eq!(set.is_on(1), Some(true));

        assert_eq!(
            engine.stop().unwrap(),
            StopStatus::Stopped(TaskOutcome::Completed)
        );
    }

    #[test]
    fn duration_limit_expires_the_task() {
        let (mut engine, _) = engine(&[Digital]);
        let request = PatternRequest::new(Pattern::Chase)
            .with_interval(TICK)
            .with_duration(Duration::from_millis(30));
        engine.start(request).unwrap();

        assert!(wait_until(Duration::from_secs(2), || engine.state()
            == EngineState::Idle));
        assert_eq!(
            engine.stop().unwrap(),
            StopStatus::Stopped(TaskOutcome::Expired)
        );
    }

    #[test]
    fn invalid_request_leaves_the_running_task_alone() {
        let (mut engine, _) = engine(&[Digital, Digital]);
        engine
            .start(PatternRequest::new(Pattern::Chase).with_interval(TICK))
            .unwrap();

        let err = engine
            .start(PatternRequest::new(Pattern::Fade { channel: 0 }))
            .unwrap_err();

        assert_eq!(
            err,
            Diagnostic::CapabilityMismatch {
                index: 0,
                required: Analog,
            }
        );
        assert_eq!(engine.state(), EngineState::Active);
        assert_eq!(engine.current_pattern(), Some("chase"));
        engine.stop().unwrap();
    }

    #[test]
    fn chase_then_blink_hands_off_to_blink() {
        let (mut engine, set) = engine(&[Digital, Digital, Digital, Digital]);

        engine
            .start(PatternRequest::new(Pattern::Chase).with_interval(Duration::from_millis(10)))
            .unwrap();
        let report = engine
            .start(PatternRequest::new(Pattern::Blink).with_interval(Duration::from_millis(10)))
            .unwrap();

        assert_eq!(report.task, 2);
        assert_eq!(
            report.previous,
            StopStatus::Stopped(TaskOutcome::Cancelled)
        );

        // Once blink owns the set, every snapshot is uniform: all on or all off.
        thread::sleep(Duration::from_millis(25));
        for _ in 0..10 {
            let levels: Vec<Level> = set.snapshot().iter().map(|c| c.level).collect();
            assert!(
                levels.iter().all(|l| *l == levels[0]),
                "chase state leaked: {levels:?}"
            );
            thread::sleep(Duration::from_millis(3));
        }
        engine.stop().unwrap();
    }

    #[test]
    fn stuck_task_is_abandoned_and_channels_still_go_off() {
        let stall = Duration::from_millis(100);
        let set = Arc::new(
            ChannelSet::new(&[Digital; 4], Box::new(StallingDriver { stall })).unwrap(),
        );
        let mut engine = PatternEngine::new(set.clone(), Duration::from_millis(20));

        engine
            .start(PatternRequest::new(Pattern::Blink).with_interval(TICK))
            .unwrap();
        // Let the task get stuck inside its first "on" write.
        thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        let status = engine.stop().unwrap();
        let elapsed = started.elapsed();

        assert!(status.is_abandoned());
        assert_eq!(engine.state(), EngineState::Idle);
        // Bounded by the stop timeout plus the one write in flight, not the
        // four stalled writes of the whole frame.
        assert!(elapsed < Duration::from_millis(250), "stop took {elapsed:?}");
        assert!(all_off(&set));
        // The abandoned task sees the cancellation before its next write.
        thread::sleep(Duration::from_millis(150));
        assert!(all_off(&set));
    }

    #[test]
    fn failed_stop_still_leaves_the_engine_idle() {
        let fail_off = Arc::new(AtomicBool::new(false));
        let driver = OffFailingDriver {
            fail_off: fail_off.clone(),
        };
        let set = Arc::new(ChannelSet::new(&[Digital, Digital], Box::new(driver)).unwrap());
        let mut engine = PatternEngine::new(set, DEFAULT_STOP_TIMEOUT);

        engine
            .start(PatternRequest::new(Pattern::Blink).with_interval(Duration::from_secs(10)))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        fail_off.store(true, Ordering::SeqCst);

        let err = engine.stop().unwrap_err();

        assert_eq!(
            err,
            DriverError::Write {
                index: 0,
                reason: "stuck high".to_string(),
            }
        );
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.current_pattern(), None);
    }

    #[test]
    fn driver_failure_ends_the_task() {
        let set = Arc::new(ChannelSet::new(&[Digital], Box::new(BrokenDriver)).unwrap());
        let mut engine = PatternEngine::new(set.clone(), DEFAULT_STOP_TIMEOUT);

        engine.start(PatternRequest::new(Pattern::AllOn)).unwrap();

        assert!(wait_until(Duration::from_secs(2), || engine.state()
            == EngineState::Idle));
        assert_eq!(
            engine.stop().unwrap(),
            StopStatus::Stopped(TaskOutcome::Failed(DriverError::Write {
                index: 0,
                reason: "shorted".to_string(),
            }))
        );
        assert_eq!(set.is_on(0), Some(false));
    }

    #[test]
    fn run_routine_returns_cancelled_when_pre_cancelled() {
        let set = channels(&[Digital]);
        let token = CancelToken::new();
        token.cancel();

        let outcome = run_routine(&set, &PatternRequest::new(Pattern::Blink), &token).unwrap();

        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert_eq!(set.is_on(0), Some(false));
    }

    #[test]
    fn run_routine_plays_a_display_to_the_end() {
        let set = channels(&[Digital, Digital]);
        let request = PatternRequest::new(Pattern::Display {
            frames: vec![vec![true, false], vec![false, true, true]],
        })
        .with_interval(Duration::from_millis(1));

        let outcome = run_routine(&set, &request, &CancelToken::new()).unwrap();

        assert_eq!(outcome, TaskOutcome::Completed);
        assert_eq!(set.is_on(0), Some(false));
        assert_eq!(set.is_on(1), Some(true));
    }
}
