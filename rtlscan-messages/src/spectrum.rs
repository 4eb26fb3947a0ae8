use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bins per megahertz of the frequency grid (20 Hz resolution).
pub const BINS_PER_MHZ: f64 = 5e4;

/// Seconds since the Unix epoch at which a sweep started.
pub type Timestamp = f64;

/// A frequency quantized onto the fixed 1/50000 MHz grid.
///
/// Quantizing makes bins from successive captures land on identical keys so
/// overlapping captures can be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FreqBin(pub i64);

impl FreqBin {
    /// Round a frequency in MHz to the nearest bin, halves rounding up.
    pub fn from_mhz(mhz: f64) -> Self {
        Self((mhz * BINS_PER_MHZ + 0.5).floor() as i64)
    }

    pub fn mhz(self) -> f64 {
        self.0 as f64 / BINS_PER_MHZ
    }
}

/// Power levels (dB) of one capture or one sweep, keyed by frequency bin.
///
/// Iteration is always in ascending frequency order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "Vec<(f64, f32)>", from = "Vec<(f64, f32)>")]
pub struct Slice {
    points: BTreeMap<FreqBin, f32>,
}

impl Slice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a level, returning the one it replaced.
    pub fn insert(&mut self, bin: FreqBin, level: f32) -> Option<f32> {
        self.points.insert(bin, level)
    }

    pub fn insert_mhz(&mut self, mhz: f64, level: f32) -> Option<f32> {
        self.insert(FreqBin::from_mhz(mhz), level)
    }

    pub fn get(&self, bin: FreqBin) -> Option<f32> {
        self.points.get(&bin).copied()
    }

    pub fn get_mut(&mut self, bin: FreqBin) -> Option<&mut f32> {
        self.points.get_mut(&bin)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (FreqBin, f32)> + '_ {
        self.points.iter().map(|(bin, level)| (*bin, *level))
    }

    /// `(MHz, dB)` pairs in ascending frequency order.
    pub fn points(&self) -> Vec<(f64, f32)> {
        self.iter().map(|(bin, level)| (bin.mhz(), level)).collect()
    }

    /// Points with `start <= f <= end` (MHz), ascending.
    pub fn window(&self, start: f64, end: f64) -> Vec<(f64, f32)> {
        let (lo, hi) = (FreqBin::from_mhz(start), FreqBin::from_mhz(end));
        if lo > hi {
            return Vec::new();
        }
        self.points
            .range(lo..=hi)
            .map(|(bin, level)| (bin.mhz(), *level))
            .filter(|(f, _)| *f >= start && *f <= end)
            .collect()
    }

    pub fn min_freq(&self) -> Option<f64> {
        self.points.keys().next().map(|bin| bin.mhz())
    }

    pub fn max_freq(&self) -> Option<f64> {
        self.points.keys().next_back().map(|bin| bin.mhz())
    }

    /// The strongest point; on ties the lowest frequency wins.
    pub fn peak(&self) -> Option<(f64, f32)> {
        self.iter()
            .fold(None, |best: Option<(FreqBin, f32)>, (bin, level)| match best {
                Some((_, best_level)) if best_level >= level => best,
                _ => Some((bin, level)),
            })
            .map(|(bin, level)| (bin.mhz(), level))
    }

    pub fn min_level(&self) -> Option<f32> {
        self.points.values().copied().reduce(f32::min)
    }

    pub fn max_level(&self) -> Option<f32> {
        self.points.values().copied().reduce(f32::max)
    }
}

impl FromIterator<(FreqBin, f32)> for Slice {
    fn from_iter<I: IntoIterator<Item = (FreqBin, f32)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<(f64, f32)>> for Slice {
    fn from(points: Vec<(f64, f32)>) -> Self {
        points
            .into_iter()
            .map(|(mhz, level)| (FreqBin::from_mhz(mhz), level))
            .collect()
    }
}

impl From<Slice> for Vec<(f64, f32)> {
    fn from(slice: Slice) -> Self {
        slice.points()
    }
}
