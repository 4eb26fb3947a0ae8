use serde::{Deserialize, Serialize};

/// Frequency in Hertz.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Hertz(pub f64);

impl std::fmt::Display for Hertz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.abs() >= 1e6 {
            write!(f, "{:.6} MHz", self.0 / 1e6)
        } else if self.0.abs() >= 1e3 {
            write!(f, "{:.3} kHz", self.0 / 1e3)
        } else {
            write!(f, "{} Hz", self.0)
        }
    }
}

impl Hertz {
    pub const fn khz(khz: f64) -> Self {
        Self(khz * 1_000.0)
    }

    pub const fn mhz(mhz: f64) -> Self {
        Self(mhz * 1_000_000.0)
    }

    pub const fn as_hz(self) -> f64 {
        self.0
    }

    pub const fn as_mhz(self) -> f64 {
        self.0 / 1_000_000.0
    }
}

impl From<f64> for Hertz {
    fn from(hz: f64) -> Self {
        Self(hz)
    }
}

impl From<Hertz> for f64 {
    fn from(hz: Hertz) -> Self {
        hz.0
    }
}

/// Level in Decibels (dB).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Decibels(pub f32);

impl std::fmt::Display for Decibels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} dB", self.0)
    }
}

impl Decibels {
    /// Convert decibels to a linear power ratio.
    /// For power: linear = 10^(dB/10)
    pub fn to_power(self) -> f64 {
        10.0_f64.powf(f64::from(self.0) / 10.0)
    }

    /// Convert a linear power ratio to decibels.
    /// For power: dB = 10 * log10(linear)
    pub fn from_power(power: f64) -> Self {
        Self((10.0 * power.log10()) as f32)
    }

    pub const fn as_db(self) -> f32 {
        self.0
    }
}

impl From<f32> for Decibels {
    fn from(db: f32) -> Self {
        Self(db)
    }
}

impl From<Decibels> for f32 {
    fn from(db: Decibels) -> Self {
        db.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hertz_conversions() {
        assert_eq!(Hertz::mhz(2.0), Hertz(2_000_000.0));
        assert_eq!(Hertz::khz(500.0).as_hz(), 500_000.0);
        assert_eq!(Hertz(88_500_000.0).as_mhz(), 88.5);
    }

    #[test]
    fn test_decibels_power_roundtrip() {
        assert_eq!(Decibels::from_power(100.0), Decibels(20.0));
        assert!((Decibels(-30.0).to_power() - 0.001).abs() < 1e-12);
    }
}
