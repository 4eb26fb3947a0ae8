use crate::Hertz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected sweep parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("Start should be lower than end ({start} >= {stop} MHz)")]
    Inverted { start: f64, stop: f64 },

    #[error("Dwell should be positive (got {0} s)")]
    Dwell(f64),

    #[error("FFT bins should be positive")]
    FftBins,
}

/// Frequency range and capture parameters of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    start_mhz: f64,
    stop_mhz: f64,
    dwell: f64,
    fft_bins: u32,
}

impl SweepRange {
    pub fn new(start_mhz: f64, stop_mhz: f64, dwell: f64, fft_bins: u32) -> Result<Self, RangeError> {
        // NaN fails every comparison, so these also reject it
        if !(stop_mhz > start_mhz) {
            return Err(RangeError::Inverted {
                start: start_mhz,
                stop: stop_mhz,
            });
        }
        if !(dwell > 0.0) {
            return Err(RangeError::Dwell(dwell));
        }
        if fft_bins == 0 {
            return Err(RangeError::FftBins);
        }
        Ok(Self {
            start_mhz,
            stop_mhz,
            dwell,
            fft_bins,
        })
    }

    /// The one-megahertz wide range used to calibrate against a known carrier.
    pub fn calibration(reference_mhz: f64, dwell: f64, fft_bins: u32) -> Result<Self, RangeError> {
        let start = reference_mhz.floor();
        let mut stop = reference_mhz.ceil();
        if stop <= start {
            stop = start + 1.0;
        }
        Self::new(start, stop, dwell, fft_bins)
    }

    pub fn start(&self) -> Hertz {
        Hertz::mhz(self.start_mhz)
    }

    pub fn stop(&self) -> Hertz {
        Hertz::mhz(self.stop_mhz)
    }

    pub fn start_mhz(&self) -> f64 {
        self.start_mhz
    }

    pub fn stop_mhz(&self) -> f64 {
        self.stop_mhz
    }

    /// Dwell time per step in seconds.
    pub fn dwell(&self) -> f64 {
        self.dwell
    }

    pub fn fft_bins(&self) -> u32 {
        self.fft_bins
    }

    /// Samples captured per step: the dwell rounded up to a power of two.
    pub fn samples(&self, sample_rate: Hertz) -> usize {
        let samples = (self.dwell * sample_rate.as_hz()) as usize;
        samples.max(1).next_power_of_two()
    }

    /// Dwell actually achieved once the capture is rounded to a power of two,
    /// truncated to milliseconds.
    pub fn real_dwell(&self, sample_rate: Hertz) -> f64 {
        let dwell = self.samples(sample_rate) as f64 / sample_rate.as_hz();
        (dwell * 1000.0).trunc() / 1000.0
    }
}
