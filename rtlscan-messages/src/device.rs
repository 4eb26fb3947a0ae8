use crate::{Decibels, Hertz};
use serde::{Deserialize, Serialize};

/// Default rtl_tcp port.
pub const DEFAULT_PORT: u16 = 1234;
/// Default tuner sample rate.
pub const SAMPLE_RATE: Hertz = Hertz::mhz(2.0);
/// Usable analysis bandwidth of one capture.
pub const BANDWIDTH: Hertz = Hertz::khz(500.0);

/// Which backend a tuner is reached through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunerIdentity {
    /// Locally attached dongle, by librtlsdr device index.
    Local(u32),
    /// rtl_tcp server.
    Remote { host: String, port: u16 },
}

impl std::fmt::Display for TunerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(index) => write!(f, "device #{index}"),
            Self::Remote { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Static configuration for one tuner.
///
/// Fixed for the lifetime of a sweep; callers edit it between sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub identity: TunerIdentity,
    /// Tuner gain
    pub gain: Decibels,
    /// Local oscillator of an up/down converter in front of the tuner.
    /// Added to every tuned frequency.
    pub lo_offset: Hertz,
    /// Frequency correction in parts per million
    pub calibration_ppm: f64,
    /// Sample rate the tuner is configured for
    pub sample_rate: Hertz,
    /// Usable bandwidth of one capture
    pub bandwidth: Hertz,
    /// Guard band kept clear of the tuner's DC spike
    pub guard_offset: Hertz,
    /// Added to every measured level
    pub level_offset: Decibels,
}

impl DeviceDescriptor {
    pub fn local(index: u32) -> Self {
        Self::with_identity(TunerIdentity::Local(index))
    }

    pub fn remote(host: impl Into<String>, port: u16) -> Self {
        Self::with_identity(TunerIdentity::Remote {
            host: host.into(),
            port,
        })
    }

    fn with_identity(identity: TunerIdentity) -> Self {
        Self {
            identity,
            gain: Decibels(0.0),
            lo_offset: Hertz(0.0),
            calibration_ppm: 0.0,
            sample_rate: SAMPLE_RATE,
            bandwidth: BANDWIDTH,
            guard_offset: Hertz(BANDWIDTH.as_hz() / 2.0),
            level_offset: Decibels(0.0),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.identity, TunerIdentity::Remote { .. })
    }
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self::local(0)
    }
}

/// Tuner chip reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TunerType {
    #[default]
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820T,
    R828D,
}

impl TunerType {
    /// Map the librtlsdr / rtl_tcp tuner code.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::E4000,
            2 => Self::Fc0012,
            3 => Self::Fc0013,
            4 => Self::Fc2580,
            5 => Self::R820T,
            6 => Self::R828D,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::E4000 => "Elonics E4000",
            Self::Fc0012 => "Fitipower FC0012",
            Self::Fc0013 => "Fitipower FC0013",
            Self::Fc2580 => "FCI FC2580",
            Self::R820T => "Rafael Micro R820T",
            Self::R828D => "Rafael Micro R828D",
        }
    }
}

impl std::fmt::Display for TunerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
