//! Tuner capability and its two backends.
//!
//! The sweep controller only ever talks to `dyn Tuner`; which backend sits
//! behind it is decided once, from the device's [`TunerIdentity`].

pub mod local;
pub mod rtltcp;

use log::{debug, info};
use num_complex::Complex;
use rtlscan_messages::{Decibels, DeviceDescriptor, Hertz, TunerIdentity, TunerType};

use crate::error::{Result, TunerError};
pub use local::{LocalDevice, LocalTuner, list_devices, nearest_gain};
pub use rtltcp::{RtlTcp, RtlTcpOptions};

/// What the sweep needs from a receiver: configure, tune, read, close.
///
/// Not `Send`: a tuner is opened, used and closed on the sweep thread.
pub trait Tuner {
    fn set_sample_rate(&mut self, rate: Hertz) -> Result<()>;

    fn set_gain(&mut self, gain: Decibels) -> Result<()>;

    fn set_center_freq(&mut self, freq: Hertz) -> Result<()>;

    /// Block until exactly `count` samples have been captured.
    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>>;

    fn tuner_type(&self) -> TunerType;

    /// Non-fatal problem noticed while opening, if any.
    fn open_warning(&self) -> Option<String> {
        None
    }

    fn close(&mut self) -> Result<()>;
}

/// Opens (and reopens) the backend for a device.
pub trait TunerOpener: Send + Sync {
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn Tuner>>;
}

/// Opens the real backend named by the device identity and applies its
/// sample rate and gain.
#[derive(Debug, Clone, Default)]
pub struct BackendOpener {
    pub remote: RtlTcpOptions,
}

impl BackendOpener {
    pub fn new(remote: RtlTcpOptions) -> Self {
        Self { remote }
    }
}

impl TunerOpener for BackendOpener {
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn Tuner>> {
        info!("Opening tuner {}", device.identity);
        let mut tuner: Box<dyn Tuner> = match &device.identity {
            TunerIdentity::Local(index) => Box::new(LocalTuner::open(*index)?),
            TunerIdentity::Remote { host, port } => {
                Box::new(RtlTcp::connect(host, *port, self.remote.clone())?)
            }
        };
        tuner.set_sample_rate(device.sample_rate)?;
        tuner.set_gain(device.gain)?;
        debug!(
            "Tuner {} ready: {} at {}, gain {}",
            device.identity,
            tuner.tuner_type(),
            device.sample_rate,
            device.gain
        );
        Ok(tuner)
    }
}

/// Frequencies and rates travel to the hardware as unsigned 32-bit Hz.
pub(crate) fn hz_to_u32(value: Hertz) -> Result<u32> {
    let hz = value.as_hz().round();
    if !(0.0..=f64::from(u32::MAX)).contains(&hz) {
        return Err(TunerError::Programming(format!(
            "{value} is outside the tuner's range"
        )));
    }
    Ok(hz as u32)
}

/// Gain as tenths of a dB, the unit librtlsdr and rtl_tcp use.
pub(crate) fn gain_tenths(gain: Decibels) -> i32 {
    (gain.as_db() * 10.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hz_to_u32_limits() {
        assert_eq!(hz_to_u32(Hertz::mhz(100.0)).unwrap(), 100_000_000);
        assert!(matches!(
            hz_to_u32(Hertz(-1.0)),
            Err(TunerError::Programming(_))
        ));
        assert!(matches!(
            hz_to_u32(Hertz::mhz(5000.0)),
            Err(TunerError::Programming(_))
        ));
    }

    #[test]
    fn test_gain_tenths() {
        assert_eq!(gain_tenths(Decibels(49.6)), 496);
        assert_eq!(gain_tenths(Decibels(0.0)), 0);
    }
}
