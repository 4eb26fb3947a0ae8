//! Sweep controller: steps a tuner across a frequency range.
//!
//! Each step tunes to `freq + lo`, captures a block and reports it as a
//! `Data` event. Adjacent captures overlap by half the analysis bandwidth.
//! Transient I/O faults close and reopen the tuner and retry the same step;
//! anything else ends the sweep with an `Error` event.

use log::{debug, error, info, warn};
use num_complex::Complex;
use rtlscan_messages::{DeviceDescriptor, Hertz, StatusEvent, SweepRange, SweepState, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::TunerError;
use crate::lock;
use crate::sinks::EventSink;
use crate::tuner::{Tuner, TunerOpener};

/// Retry policy for a sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Pause between reopen attempts that themselves failed.
    pub retry_delay: Duration,
    /// Give up on a step after this many retries. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(500),
            max_retries: None,
        }
    }
}

/// How a sweep ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Finished,
    Stopped,
    Error(String),
}

impl SweepOutcome {
    pub fn state(&self) -> SweepState {
        match self {
            Self::Finished => SweepState::Finished,
            Self::Stopped => SweepState::Stopped,
            Self::Error(_) => SweepState::ErrorTerminated,
        }
    }
}

/// The tuning frequencies of a sweep.
///
/// Starts one guard offset below the range and ends one guard offset above
/// it, stepping by half the analysis bandwidth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPlan {
    start: f64,
    stop: f64,
    offset: f64,
    bandwidth: f64,
}

impl StepPlan {
    pub fn new(device: &DeviceDescriptor, range: &SweepRange) -> Self {
        Self {
            start: range.start().as_hz(),
            stop: range.stop().as_hz(),
            offset: device.guard_offset.as_hz(),
            bandwidth: device.bandwidth.as_hz(),
        }
    }

    pub fn step(&self) -> f64 {
        self.bandwidth / 2.0
    }

    pub fn first(&self) -> f64 {
        self.start - self.offset
    }

    pub fn last(&self) -> f64 {
        self.stop + self.offset
    }

    /// Number of captures in the sweep.
    pub fn count(&self) -> usize {
        if !(self.step() > 0.0) || self.last() < self.first() {
            return 0;
        }
        // Tolerate rounding so a step landing exactly on the end is kept
        ((self.last() - self.first()) / self.step() + 1e-9).floor() as usize + 1
    }

    /// Nominal (pre-LO) frequency of step `index`.
    pub fn frequency(&self, index: usize) -> f64 {
        self.first() + index as f64 * self.step()
    }

    pub fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.count()).map(|index| self.frequency(index))
    }

    /// Percentage complete when tuned to `freq`.
    pub fn progress(&self, freq: f64) -> f64 {
        (freq - self.start + self.offset) / (self.stop - self.start + self.bandwidth) * 100.0
    }
}

/// Cooperative cancellation shared between a sweep and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One sweep across a range. Created per sweep and consumed by [`run`].
///
/// [`run`]: SweepController::run
pub struct SweepController {
    device: DeviceDescriptor,
    range: SweepRange,
    is_calibration: bool,
    config: SweepConfig,
    opener: Arc<dyn TunerOpener>,
    sink: Arc<dyn EventSink>,
    stop: StopToken,
    state: Arc<Mutex<SweepState>>,
    timestamp: Timestamp,
}

impl std::fmt::Debug for SweepController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepController")
            .field("device", &self.device.identity)
            .field("range", &self.range)
            .field("is_calibration", &self.is_calibration)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl SweepController {
    /// Create a sweep. Emits `Starting` and `StepCount` straight away.
    pub fn new(
        device: DeviceDescriptor,
        range: SweepRange,
        is_calibration: bool,
        config: SweepConfig,
        opener: Arc<dyn TunerOpener>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let controller = Self {
            device,
            range,
            is_calibration,
            config,
            opener,
            sink,
            stop: StopToken::new(),
            state: Arc::new(Mutex::new(SweepState::Starting)),
            timestamp: now_seconds(),
        };

        controller.sink.push(StatusEvent::Starting);
        let steps = StepPlan::new(&controller.device, &controller.range).count();
        controller.sink.push(StatusEvent::StepCount(steps));
        controller
    }

    /// Key this sweep's data under a specific timestamp instead of the
    /// current wall-clock second.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn state(&self) -> SweepState {
        *lock(&self.state)
    }

    /// Run the sweep on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<SweepHandle> {
        let stop = self.stop.clone();
        let state = Arc::clone(&self.state);
        let thread = thread::Builder::new()
            .name("sweep".into())
            .spawn(move || self.run())?;
        Ok(SweepHandle {
            stop,
            state,
            thread: Some(thread),
        })
    }

    /// Run the sweep on the calling thread until it finishes, is stopped or
    /// fails.
    pub fn run(self) -> SweepOutcome {
        let plan = StepPlan::new(&self.device, &self.range);
        if plan.count() == 0 {
            return self.fail(None, "Analysis bandwidth must be positive".into());
        }

        let mut tuner = match self.opener.open(&self.device) {
            Ok(tuner) => tuner,
            Err(e) => {
                error!("Cannot open tuner {}: {e}", self.device.identity);
                return self.fail(None, e.to_string());
            }
        };
        if let Some(warning) = tuner.open_warning() {
            self.sink.push(StatusEvent::Warning(warning));
        }
        self.sink.push(StatusEvent::TunerInfo(tuner.tuner_type()));
        self.set_state(SweepState::Sweeping);

        let samples = self.range.samples(self.device.sample_rate);
        info!(
            "Sweeping {} - {} MHz, {} steps of {samples} samples",
            self.range.start_mhz(),
            self.range.stop_mhz(),
            plan.count()
        );

        let mut index = 0;
        let mut attempt = 0u32;
        while index < plan.count() {
            let freq = plan.frequency(index);

            if self.stop.is_stopped() {
                info!("Sweep stopped at {}", Hertz(freq));
                close_quietly(tuner.as_mut());
                return self.stopped();
            }

            if attempt == 0 {
                self.sink.push(StatusEvent::Progress(plan.progress(freq)));
            }

            match self.capture(tuner.as_mut(), freq, samples) {
                Ok(block) => {
                    debug!("Captured {} samples at {}", block.len(), Hertz(freq));
                    let delivered = self.sink.push(StatusEvent::Data {
                        timestamp: self.timestamp,
                        freq,
                        samples: Arc::new(block),
                    });
                    if !delivered {
                        debug!("Nobody is listening, stopping sweep");
                        self.stop.stop();
                    }
                    attempt = 0;
                    index += 1;
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    warn!("Capture at {} failed ({e}), reopening tuner", Hertz(freq));
                    self.sink.push(StatusEvent::Retrying {
                        freq,
                        attempt,
                        message: e.to_string(),
                    });
                    close_quietly(tuner.as_mut());

                    tuner = match self.reopen(&mut attempt) {
                        Ok(Some(tuner)) => tuner,
                        Ok(None) => {
                            info!("Sweep stopped while reopening at {}", Hertz(freq));
                            return self.stopped();
                        }
                        Err(message) => return self.fail(None, message),
                    };
                }
                Err(e) => {
                    error!("Capture at {} failed: {e}", Hertz(freq));
                    return self.fail(Some(tuner.as_mut()), e.to_string());
                }
            }
        }

        close_quietly(tuner.as_mut());
        info!("Sweep finished");
        self.set_state(SweepState::Finished);
        self.sink.push(StatusEvent::Finished {
            is_calibration: self.is_calibration,
        });
        SweepOutcome::Finished
    }

    fn capture(&self, tuner: &mut dyn Tuner, freq: f64, samples: usize) -> Result<Vec<Complex<f32>>, TunerError> {
        tuner.set_center_freq(Hertz(freq + self.device.lo_offset.as_hz()))?;
        let block = tuner.read_samples(samples)?;
        if block.is_empty() {
            return Err(TunerError::Programming("No samples returned".into()));
        }
        Ok(block)
    }

    /// Reopen after a transient fault, retrying failed opens until the
    /// retry cap. `Ok(None)` means the sweep was stopped meanwhile.
    fn reopen(&self, attempt: &mut u32) -> Result<Option<Box<dyn Tuner>>, String> {
        loop {
            if let Some(max) = self.config.max_retries
                && *attempt > max
            {
                return Err(format!("Giving up after {max} retries"));
            }
            if self.stop.is_stopped() {
                return Ok(None);
            }

            match self.opener.open(&self.device) {
                Ok(tuner) => {
                    debug!("Tuner {} reopened", self.device.identity);
                    return Ok(Some(tuner));
                }
                Err(e) if e.is_recoverable() => {
                    *attempt += 1;
                    warn!("Reopening {} failed: {e}", self.device.identity);
                    thread::sleep(self.config.retry_delay);
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    fn stopped(&self) -> SweepOutcome {
        self.set_state(SweepState::Stopped);
        self.sink.push(StatusEvent::Stopped);
        SweepOutcome::Stopped
    }

    fn fail(&self, tuner: Option<&mut dyn Tuner>, message: String) -> SweepOutcome {
        if let Some(tuner) = tuner {
            close_quietly(tuner);
        }
        self.set_state(SweepState::ErrorTerminated);
        self.sink.push(StatusEvent::Error(message.clone()));
        SweepOutcome::Error(message)
    }

    fn set_state(&self, state: SweepState) {
        *lock(&self.state) = state;
    }
}

/// A sweep running on its own thread. Dropping the handle stops the sweep
/// and waits for it.
#[derive(Debug)]
pub struct SweepHandle {
    stop: StopToken,
    state: Arc<Mutex<SweepState>>,
    thread: Option<JoinHandle<SweepOutcome>>,
}

impl SweepHandle {
    /// Ask the sweep to stop before its next capture.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> SweepState {
        *lock(&self.state)
    }

    /// Whether the sweep has ended. True as soon as the terminal event has
    /// been sent, even if the thread is still unwinding.
    pub fn is_finished(&self) -> bool {
        self.state().is_done() || self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the sweep to end.
    pub fn join(mut self) -> SweepOutcome {
        self.join_thread()
    }

    fn join_thread(&mut self) -> SweepOutcome {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| SweepOutcome::Error("Sweep thread panicked".into())),
            None => self.state_outcome(),
        }
    }

    fn state_outcome(&self) -> SweepOutcome {
        match self.state() {
            SweepState::Finished => SweepOutcome::Finished,
            SweepState::ErrorTerminated => SweepOutcome::Error("Sweep failed".into()),
            _ => SweepOutcome::Stopped,
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
            self.join_thread();
        }
    }
}

fn close_quietly(tuner: &mut dyn Tuner) {
    if let Err(e) = tuner.close() {
        debug!("Closing tuner: {e}");
    }
}

fn now_seconds() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as f64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(start: f64, stop: f64) -> StepPlan {
        StepPlan::new(
            &DeviceDescriptor::default(),
            &SweepRange::new(start, stop, 0.01, 256).unwrap(),
        )
    }

    #[test]
    fn test_step_plan_covers_range_with_guard() {
        let plan = plan(100.0, 101.0);
        assert_eq!(plan.step(), 250_000.0);
        assert_eq!(plan.first(), 99_750_000.0);
        assert_eq!(plan.last(), 101_250_000.0);
        // 99.75 .. 101.25 MHz in 250 kHz steps
        assert_eq!(plan.count(), 7);

        let freqs: Vec<f64> = plan.frequencies().collect();
        assert_eq!(freqs.first(), Some(&99_750_000.0));
        assert_eq!(freqs.last(), Some(&101_250_000.0));
        for pair in freqs.windows(2) {
            assert_eq!(pair[1] - pair[0], 250_000.0);
        }
    }

    #[test]
    fn test_step_plan_progress() {
        let plan = plan(100.0, 101.0);
        assert_eq!(plan.progress(plan.first()), 0.0);
        // (101.25 - 100 + 0.25) / (1 + 0.5)
        assert_eq!(plan.progress(plan.last()), 100.0);
    }

    #[test]
    fn test_stop_token_is_shared() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_stopped());
        token.stop();
        assert!(clone.is_stopped());
    }
}
