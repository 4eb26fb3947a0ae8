//! Locally attached RTL-SDR dongle via librtlsdr.
//!
//! Enable the `hardware` feature to compile with librtlsdr support; without
//! it, opening a local device fails with a connection error and no devices
//! are listed.

use num_complex::Complex;
use rtlscan_messages::{Decibels, Hertz, TunerType};

use super::Tuner;
use crate::error::{Result, TunerError};

/// A dongle found on the USB bus.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDevice {
    pub index: u32,
    pub name: String,
    pub serial: String,
    pub tuner: TunerType,
    /// Supported gains, ascending.
    pub gains: Vec<Decibels>,
}

impl LocalDevice {
    /// The supported gain closest to `gain`, or `gain` itself if the device
    /// reported none.
    pub fn nearest_gain(&self, gain: Decibels) -> Decibels {
        nearest_gain(&self.gains, gain).unwrap_or(gain)
    }
}

pub fn nearest_gain(gains: &[Decibels], gain: Decibels) -> Option<Decibels> {
    gains.iter().copied().min_by(|a, b| {
        let da = (a.as_db() - gain.as_db()).abs();
        let db = (b.as_db() - gain.as_db()).abs();
        da.total_cmp(&db)
    })
}

/// Enumerate attached dongles. Devices that cannot be opened (busy, no
/// permission) are skipped.
#[cfg(feature = "hardware")]
pub fn list_devices() -> Vec<LocalDevice> {
    let count = rtlsdr::get_device_count();
    let mut devices = Vec::new();

    #[allow(clippy::cast_sign_loss)]
    for i in 0..count {
        let name = rtlsdr::get_device_name(i);
        let serial = rtlsdr::get_device_usb_strings(i)
            .map(|strings| strings.serial)
            .unwrap_or_default();
        let mut device = match rtlsdr::open(i) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("Skipping RTL-SDR device {i} ({name}): {e}");
                continue;
            }
        };
        let (code, _) = device.get_tuner_type();
        let gains = device
            .get_tuner_gains()
            .map(|gains| gains.into_iter().map(|g| Decibels(g as f32 / 10.0)).collect())
            .unwrap_or_default();
        // Dropping the handle closes it
        drop(device);

        devices.push(LocalDevice {
            index: i as u32,
            name,
            serial,
            tuner: TunerType::from_code(code as u32),
            gains,
        });
    }

    devices
}

#[cfg(not(feature = "hardware"))]
pub fn list_devices() -> Vec<LocalDevice> {
    log::warn!("RTL-SDR hardware support not compiled (enable 'hardware' feature)");
    Vec::new()
}

/// Direct librtlsdr handle.
///
/// The handle is not `Send`; it is opened and used on the sweep thread.
#[cfg(feature = "hardware")]
pub struct LocalTuner {
    index: u32,
    tuner: TunerType,
    device: Option<rtlsdr::RTLSDRDevice>,
}

/// Stub when the hardware feature is disabled.
#[cfg(not(feature = "hardware"))]
#[derive(Debug)]
pub struct LocalTuner {
    _private: (),
}

#[cfg(feature = "hardware")]
impl std::fmt::Debug for LocalTuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTuner")
            .field("index", &self.index)
            .field("tuner", &self.tuner)
            .field("open", &self.device.is_some())
            .finish()
    }
}

#[cfg(feature = "hardware")]
impl LocalTuner {
    pub fn open(index: u32) -> Result<Self> {
        let code = i32::try_from(index)
            .map_err(|_| TunerError::Connect(format!("RTL-SDR device index {index} out of range")))?;
        let mut device = rtlsdr::open(code).map_err(|e| {
            TunerError::Connect(format!("Failed to open RTL-SDR device {index}: {e}"))
        })?;
        let (tuner, name) = device.get_tuner_type();
        log::info!("RTL-SDR device {index} opened, {name} tuner");
        Ok(Self {
            index,
            tuner: TunerType::from_code(tuner as u32),
            device: Some(device),
        })
    }

    fn device(&mut self) -> Result<&mut rtlsdr::RTLSDRDevice> {
        self.device.as_mut().ok_or_else(|| {
            TunerError::Programming(format!("RTL-SDR device {} is closed", self.index))
        })
    }
}

#[cfg(feature = "hardware")]
impl Tuner for LocalTuner {
    fn set_sample_rate(&mut self, rate: Hertz) -> Result<()> {
        let hz = super::hz_to_u32(rate)?;
        self.device()?
            .set_sample_rate(hz)
            .map_err(|e| TunerError::device(format!("set sample rate: {e}")))
    }

    fn set_gain(&mut self, gain: Decibels) -> Result<()> {
        let device = self.device()?;
        // true = manual gain
        device
            .set_tuner_gain_mode(true)
            .map_err(|e| TunerError::device(format!("set gain mode: {e}")))?;
        device
            .set_tuner_gain(super::gain_tenths(gain))
            .map_err(|e| TunerError::device(format!("set gain: {e}")))
    }

    fn set_center_freq(&mut self, freq: Hertz) -> Result<()> {
        let hz = super::hz_to_u32(freq)?;
        let device = self.device()?;
        device
            .set_center_freq(hz)
            .map_err(|e| TunerError::device(format!("set frequency: {e}")))?;
        device
            .reset_buffer()
            .map_err(|e| TunerError::device(format!("reset buffer: {e}")))
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex<f32>>> {
        let buf = self
            .device()?
            .read_sync(count * 2)
            .map_err(|e| TunerError::device(format!("read: {e}")))?;
        if buf.len() < count * 2 {
            return Err(TunerError::device(format!(
                "short read: {} of {} bytes",
                buf.len(),
                count * 2
            )));
        }
        Ok(super::rtltcp::samples_from_bytes(&buf))
    }

    fn tuner_type(&self) -> TunerType {
        self.tuner
    }

    fn close(&mut self) -> Result<()> {
        // The handle closes the device when dropped
        if self.device.take().is_some() {
            log::info!("RTL-SDR device {} closed", self.index);
        }
        Ok(())
    }
}

#[cfg(not(feature = "hardware"))]
impl LocalTuner {
    pub fn open(index: u32) -> Result<Self> {
        log::warn!("RTL-SDR hardware support not compiled (enable 'hardware' feature)");
        Err(TunerError::Connect(format!(
            "Cannot open RTL-SDR device {index}: hardware support not compiled (enable the 'hardware' feature)"
        )))
    }
}

#[cfg(not(feature = "hardware"))]
impl Tuner for LocalTuner {
    fn set_sample_rate(&mut self, _rate: Hertz) -> Result<()> {
        Ok(())
    }

    fn set_gain(&mut self, _gain: Decibels) -> Result<()> {
        Ok(())
    }

    fn set_center_freq(&mut self, _freq: Hertz) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self, _count: usize) -> Result<Vec<Complex<f32>>> {
        Ok(Vec::new())
    }

    fn tuner_type(&self) -> TunerType {
        TunerType::Unknown
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
