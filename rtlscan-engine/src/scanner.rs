//! The consumer-facing facade: start a sweep, watch its events, read the
//! accumulated spectrum.
//!
//! Captures flow from the sweep thread through a [`PipelineSink`], which
//! forwards every event to the caller and hands each `Data` block to the
//! worker pool for estimation and merging into the store.

use log::{debug, info, warn};
use num_complex::Complex;
use rtlscan_messages::{Decibels, DeviceDescriptor, Hertz, StatusEvent, SweepRange, SweepState, Timestamp};
use std::sync::{Arc, Mutex};

use crate::error::EngineError;
use crate::estimator::{EstimatorConfig, SpectralEstimator};
use crate::lock;
use crate::pool::{DEFAULT_WORKERS, WorkerPool};
use crate::sinks::{ChannelSink, EventSink};
use crate::store::{MergeWindow, SpectrumStore};
use crate::stream::EventStream;
use crate::sweep::{SweepConfig, SweepController, SweepHandle, SweepOutcome};
use crate::tuner::{BackendOpener, RtlTcpOptions, TunerOpener};

/// Settings shared by every sweep a scanner runs.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub estimator: EstimatorConfig,
    /// Estimation threads.
    pub workers: usize,
    pub sweep: SweepConfig,
    pub remote: RtlTcpOptions,
    /// Keep each sweep under its own timestamp. When false every sweep is
    /// averaged into the first one.
    pub retain: bool,
    /// Newest sweeps kept when retaining.
    pub max_sweeps: Option<usize>,
    /// Emit `Alert` when a merged level exceeds this, in dB.
    pub alert_level: Option<f32>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            workers: DEFAULT_WORKERS,
            sweep: SweepConfig::default(),
            remote: RtlTcpOptions::default(),
            retain: true,
            max_sweeps: None,
            alert_level: None,
        }
    }
}

pub struct Scanner {
    sweep: Option<SweepHandle>,
    config: ScanConfig,
    opener: Arc<dyn TunerOpener>,
    pool: Arc<WorkerPool>,
    store: Arc<Mutex<SpectrumStore>>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("sweep", &self.sweep)
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// A scanner opening real tuners.
    pub fn new(config: ScanConfig) -> Result<Self, EngineError> {
        let opener = Arc::new(BackendOpener::new(config.remote.clone()));
        Self::with_opener(config, opener)
    }

    /// A scanner opening tuners through `opener`.
    pub fn with_opener(config: ScanConfig, opener: Arc<dyn TunerOpener>) -> Result<Self, EngineError> {
        let pool = Arc::new(WorkerPool::new(config.workers)?);
        Ok(Self {
            sweep: None,
            config,
            opener,
            pool,
            store: Arc::new(Mutex::new(SpectrumStore::new())),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Start sweeping `range` on `device`. A calibration sweep ignores the
    /// device's ppm correction.
    pub fn start_sweep(&mut self, device: DeviceDescriptor, range: SweepRange, is_calibration: bool) -> Result<EventStream, EngineError> {
        if self.is_running() {
            return Err(EngineError::SweepRunning);
        }
        if let Some(previous) = self.sweep.take() {
            previous.join();
        }
        validate(&device)?;

        let (sink, event_rx) = ChannelSink::unbounded();
        let estimator = SpectralEstimator::new(range.fft_bins() as usize, device.sample_rate, &self.config.estimator);
        let pipeline = PipelineSink {
            downstream: Arc::new(sink),
            pool: Arc::clone(&self.pool),
            store: Arc::clone(&self.store),
            job: Arc::new(EstimationJob {
                estimator,
                ppm: if is_calibration { 0.0 } else { device.calibration_ppm },
                level_offset: device.level_offset,
                window: MergeWindow {
                    start_mhz: range.start_mhz(),
                    stop_mhz: range.stop_mhz(),
                    guard: device.guard_offset,
                    bandwidth: device.bandwidth,
                    alert_level: self.config.alert_level,
                },
                retain: self.config.retain,
                max_sweeps: self.config.max_sweeps,
            }),
        };

        info!(
            "Starting {} on {} ({} - {} MHz)",
            if is_calibration { "calibration" } else { "sweep" },
            device.identity,
            range.start_mhz(),
            range.stop_mhz()
        );
        let controller = SweepController::new(
            device,
            range,
            is_calibration,
            self.config.sweep.clone(),
            Arc::clone(&self.opener),
            Arc::new(pipeline),
        );
        self.sweep = Some(controller.spawn()?);
        Ok(EventStream::new(event_rx))
    }

    /// Ask the running sweep to stop. Its event stream still ends with
    /// `Stopped`.
    pub fn stop_sweep(&self) {
        if let Some(sweep) = &self.sweep {
            debug!("Stopping sweep");
            sweep.stop();
        }
    }

    /// Wait for the current sweep to end.
    pub fn wait(&mut self) -> Option<SweepOutcome> {
        self.sweep.take().map(SweepHandle::join)
    }

    pub fn is_running(&self) -> bool {
        self.sweep.as_ref().is_some_and(|sweep| !sweep.is_finished())
    }

    /// State of the current or last sweep.
    pub fn state(&self) -> Option<SweepState> {
        self.sweep.as_ref().map(SweepHandle::state)
    }

    /// A snapshot of the accumulated spectrum.
    pub fn store(&self) -> SpectrumStore {
        lock(&self.store).clone()
    }

    pub fn clear_store(&self) {
        lock(&self.store).clear();
    }
}

fn validate(device: &DeviceDescriptor) -> Result<(), EngineError> {
    if !(device.sample_rate.as_hz() > 0.0) {
        return Err(EngineError::InvalidSweep(format!("Sample rate {} is not positive", device.sample_rate)));
    }
    if !(device.bandwidth.as_hz() > 0.0) {
        return Err(EngineError::InvalidSweep(format!("Bandwidth {} is not positive", device.bandwidth)));
    }
    Ok(())
}

/// Everything an estimation job needs besides the capture itself.
struct EstimationJob {
    estimator: SpectralEstimator,
    ppm: f64,
    level_offset: Decibels,
    window: MergeWindow,
    retain: bool,
    max_sweeps: Option<usize>,
}

impl EstimationJob {
    fn run(&self, store: &Mutex<SpectrumStore>, downstream: &dyn EventSink, timestamp: Timestamp, freq: f64, samples: &[Complex<f32>]) {
        let slice = self.estimator.estimate(samples, Hertz(freq), self.ppm, self.level_offset);

        let outcome = {
            let mut store = lock(store);
            let target = if self.retain {
                timestamp
            } else {
                store.first_timestamp().unwrap_or(timestamp)
            };
            let outcome = store.accumulate(target, Hertz(freq), &slice, &self.window);
            if let Some(max_sweeps) = self.max_sweeps {
                store.retain_latest(max_sweeps);
            }
            outcome
        };

        downstream.push(StatusEvent::Processed {
            timestamp,
            freq,
            slice,
        });
        if let Some((freq, level)) = outcome.alert {
            warn!("Level {level:.1} dB at {freq:.5} MHz above alert threshold");
            downstream.push(StatusEvent::Alert { freq, level });
        }
    }
}

/// Sits between the sweep and the caller's sink, feeding captures to the
/// estimator.
///
/// Terminal events are held back until the pool is idle so that they follow
/// every `Processed` event of the sweep.
struct PipelineSink {
    downstream: Arc<dyn EventSink>,
    pool: Arc<WorkerPool>,
    store: Arc<Mutex<SpectrumStore>>,
    job: Arc<EstimationJob>,
}

impl EventSink for PipelineSink {
    fn push(&self, event: StatusEvent) -> bool {
        if let StatusEvent::Data {
            timestamp,
            freq,
            samples,
        } = &event
        {
            let (timestamp, freq, samples) = (*timestamp, *freq, Arc::clone(samples));
            let job = Arc::clone(&self.job);
            let store = Arc::clone(&self.store);
            let downstream = Arc::clone(&self.downstream);
            self.pool.execute(move || {
                job.run(&store, downstream.as_ref(), timestamp, freq, &samples);
            });
        } else if event.is_terminal() {
            self.pool.wait_idle();
        }
        self.downstream.push(event)
    }
}
