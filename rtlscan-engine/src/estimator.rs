//! Welch power spectral density of one capture, binned onto the frequency
//! grid.

use num_complex::Complex;
use rtlscan_messages::{Decibels, FreqBin, Hertz, Slice};
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Smallest PSD value converted to dB; zero power would otherwise be -inf.
pub const PSD_FLOOR: f64 = 1e-20;

/// Taper applied to each segment before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowFunction {
    Bartlett,
    Blackman,
    #[default]
    Hamming,
    Hanning,
}

impl WindowFunction {
    pub const ALL: [WindowFunction; 4] = [Self::Bartlett, Self::Blackman, Self::Hamming, Self::Hanning];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bartlett => "bartlett",
            Self::Blackman => "blackman",
            Self::Hamming => "hamming",
            Self::Hanning => "hanning",
        }
    }

    /// Symmetric window of `len` points.
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        use std::f64::consts::PI;
        if len <= 1 {
            return vec![1.0; len];
        }
        let m = (len - 1) as f64;
        (0..len)
            .map(|i| {
                let n = i as f64;
                let w = match self {
                    Self::Bartlett => 1.0 - (2.0 * n / m - 1.0).abs(),
                    Self::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * n / m).cos() + 0.08 * (4.0 * PI * n / m).cos()
                    }
                    Self::Hamming => 0.54 - 0.46 * (2.0 * PI * n / m).cos(),
                    Self::Hanning => 0.5 - 0.5 * (2.0 * PI * n / m).cos(),
                };
                w as f32
            })
            .collect()
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|window| window.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown window function '{s}'"))
    }
}

/// Estimator settings shared by every sweep of a scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    pub window: WindowFunction,
    /// Fraction of each segment shared with the next, in `[0, 1)`.
    pub overlap: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window: WindowFunction::Hamming,
            overlap: 0.0,
        }
    }
}

/// Planned FFT plus window for one segment size. Immutable once built, so
/// a single instance serves every worker.
pub struct SpectralEstimator {
    fft: Arc<dyn Fft<f32>>,
    size: usize,
    window: Vec<f32>,
    window_power: f64,
    step: usize,
    sample_rate_mhz: f64,
}

impl fmt::Debug for SpectralEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralEstimator")
            .field("size", &self.size)
            .field("step", &self.step)
            .field("sample_rate_mhz", &self.sample_rate_mhz)
            .finish_non_exhaustive()
    }
}

impl SpectralEstimator {
    pub fn new(fft_bins: usize, sample_rate: Hertz, config: &EstimatorConfig) -> Self {
        let size = fft_bins.max(1);
        let fft = FftPlanner::new().plan_fft_forward(size);
        let window = config.window.coefficients(size);
        let window_power = window.iter().map(|w| f64::from(*w).powi(2)).sum();
        let overlap = if config.overlap.is_finite() {
            config.overlap.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let shared = ((overlap * size as f64) as usize).min(size - 1);
        Self {
            fft,
            size,
            window,
            window_power,
            step: size - shared,
            sample_rate_mhz: sample_rate.as_mhz(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Two-sided PSD as `(offset MHz, power)` pairs from `-Fs/2` upwards.
    ///
    /// Segments are windowed, transformed and their `|X|^2` averaged; a block
    /// shorter than one segment is zero-padded.
    pub fn psd(&self, samples: &[Complex<f32>]) -> Vec<(f64, f64)> {
        let n = self.size;
        let mut padded;
        let data = if samples.len() < n {
            padded = samples.to_vec();
            padded.resize(n, Complex::new(0.0, 0.0));
            &padded[..]
        } else {
            samples
        };

        let noverlap = n - self.step;
        let segments = (data.len() - noverlap) / self.step;
        let mut power = vec![0.0f64; n];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        for segment in 0..segments {
            let offset = segment * self.step;
            for ((out, sample), w) in buffer
                .iter_mut()
                .zip(&data[offset..offset + n])
                .zip(&self.window)
            {
                *out = *sample * *w;
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            for (acc, bin) in power.iter_mut().zip(&buffer) {
                *acc += f64::from(bin.norm_sqr());
            }
        }

        let scale = 1.0 / (segments.max(1) as f64 * self.sample_rate_mhz * self.window_power);
        let half = (n / 2) as isize;
        (0..n)
            .map(|j| {
                let k = j as isize - half;
                let index = k.rem_euclid(n as isize) as usize;
                let freq = k as f64 * self.sample_rate_mhz / n as f64;
                (freq, power[index] * scale)
            })
            .collect()
    }

    /// Bin a capture taken with the tuner at `tuner_freq`.
    ///
    /// Frequencies are shifted by the tuner frequency, corrected by `ppm` and
    /// quantized; levels are in dB plus `level_offset`.
    pub fn estimate(&self, samples: &[Complex<f32>], tuner_freq: Hertz, ppm: f64, level_offset: Decibels) -> Slice {
        let centre = tuner_freq.as_mhz();
        self.psd(samples)
            .into_iter()
            .map(|(offset, power)| {
                let mut freq = offset + centre;
                freq += freq * ppm / 1e6;
                let level = Decibels::from_power(power.max(PSD_FLOOR)).as_db() + level_offset.as_db();
                (FreqBin::from_mhz(freq), level)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, cycles_per_sample: f64) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| {
                let phase = 2.0 * std::f64::consts::PI * cycles_per_sample * n as f64;
                Complex::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn test_windows_are_symmetric() {
        for window in WindowFunction::ALL {
            let w = window.coefficients(9);
            for i in 0..9 {
                assert!((w[i] - w[8 - i]).abs() < 1e-6, "{window} not symmetric");
            }
            assert!((w[4] - 1.0).abs() < 1e-6, "{window} peak is {}", w[4]);
        }
        assert!((WindowFunction::Hamming.coefficients(9)[0] - 0.08).abs() < 1e-6);
        assert_eq!(WindowFunction::Bartlett.coefficients(9)[0], 0.0);
    }

    #[test]
    fn test_window_from_str() {
        assert_eq!("Blackman".parse::<WindowFunction>(), Ok(WindowFunction::Blackman));
        assert!("kaiser".parse::<WindowFunction>().is_err());
    }

    #[test]
    fn test_psd_frequencies_are_centred() {
        let estimator = SpectralEstimator::new(8, Hertz::mhz(2.0), &EstimatorConfig::default());
        let freqs: Vec<f64> = estimator.psd(&tone(8, 0.0)).iter().map(|(f, _)| *f).collect();
        assert_eq!(freqs, vec![-1.0, -0.75, -0.5, -0.25, 0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_dc_power_scaling() {
        let estimator = SpectralEstimator::new(64, Hertz::mhz(2.0), &EstimatorConfig::default());
        let window = WindowFunction::Hamming.coefficients(64);
        let sum: f64 = window.iter().map(|w| f64::from(*w)).sum();
        let sum_sq: f64 = window.iter().map(|w| f64::from(*w).powi(2)).sum();

        // Averaging identical segments leaves the scaling unchanged
        let psd = estimator.psd(&tone(256, 0.0));
        let dc = psd.iter().find(|(f, _)| *f == 0.0).unwrap().1;
        let expected = sum * sum / (2.0 * sum_sq);
        assert!((dc - expected).abs() / expected < 1e-4, "{dc} vs {expected}");
    }

    #[test]
    fn test_estimate_places_tone() {
        let estimator = SpectralEstimator::new(64, Hertz::mhz(2.0), &EstimatorConfig::default());
        // Bin 4 of 64 at 2 MHz = +125 kHz
        let slice = estimator.estimate(&tone(1024, 4.0 / 64.0), Hertz::mhz(100.0), 0.0, Decibels(0.0));
        assert_eq!(slice.len(), 64);
        assert_eq!(slice.min_freq(), Some(99.0));
        let (freq, _) = slice.peak().unwrap();
        assert!((freq - 100.125).abs() < 1e-9, "peak at {freq}");
    }

    #[test]
    fn test_estimate_applies_ppm_and_level_offset() {
        let estimator = SpectralEstimator::new(64, Hertz::mhz(2.0), &EstimatorConfig::default());
        let plain = estimator.estimate(&tone(64, 0.0), Hertz::mhz(100.0), 0.0, Decibels(0.0));
        let corrected = estimator.estimate(&tone(64, 0.0), Hertz::mhz(100.0), 10.0, Decibels(-5.0));

        let (plain_freq, plain_level) = plain.peak().unwrap();
        let (freq, level) = corrected.peak().unwrap();
        assert!((plain_freq - 100.0).abs() < 1e-9);
        assert!((freq - 100.001).abs() < 1e-6, "corrected peak at {freq}");
        assert!((level - (plain_level - 5.0)).abs() < 1e-4);
    }

    #[test]
    fn test_short_and_silent_blocks() {
        let estimator = SpectralEstimator::new(64, Hertz::mhz(2.0), &EstimatorConfig::default());
        let slice = estimator.estimate(&[Complex::new(0.0, 0.0); 10], Hertz::mhz(100.0), 0.0, Decibels(0.0));
        assert_eq!(slice.len(), 64);
        assert!((slice.max_level().unwrap() + 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_overlap_adds_segments() {
        let config = EstimatorConfig {
            overlap: 0.5,
            ..EstimatorConfig::default()
        };
        let estimator = SpectralEstimator::new(64, Hertz::mhz(2.0), &config);
        assert_eq!(estimator.step, 32);
        // Still a well-formed spectrum for a block that is not a multiple of the step
        assert_eq!(estimator.psd(&tone(100, 0.0)).len(), 64);
    }
}
