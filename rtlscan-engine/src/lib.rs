//! Spectrum acquisition engine for RTL-SDR receivers.
//!
//! A [`Scanner`] steps a tuner (a local dongle or an rtl_tcp server) across
//! a frequency range, estimates the power spectrum of each capture on a
//! worker pool and accumulates the result in a [`SpectrumStore`].

pub mod calibration;
pub mod error;
pub mod estimator;
pub mod pool;
pub mod scanner;
pub mod sinks;
pub mod store;
pub mod stream;
pub mod sweep;
pub mod tuner;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use calibration::estimate_ppm;
pub use error::{EngineError, TunerError};
pub use estimator::{EstimatorConfig, SpectralEstimator, WindowFunction};
pub use pool::WorkerPool;
pub use scanner::{ScanConfig, Scanner};
pub use sinks::{CallbackSink, ChannelSink, EventSink};
pub use store::{Extent, Measure, MergeOutcome, MergeWindow, SpectrumStore};
pub use stream::EventStream;
pub use sweep::{StepPlan, StopToken, SweepConfig, SweepController, SweepHandle, SweepOutcome};
pub use tuner::{BackendOpener, LocalDevice, RtlTcpOptions, Tuner, TunerOpener, list_devices};

/// Lock a mutex, carrying on with the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
