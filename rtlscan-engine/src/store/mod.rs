//! Sweeps kept in acquisition order, one slice per timestamp.

mod extent;
mod measure;

pub use extent::Extent;
pub use measure::Measure;

use rtlscan_messages::{FreqBin, Hertz, Slice, Timestamp};
use serde::{Deserialize, Serialize};

/// Which part of a capture a live merge keeps.
///
/// Only the two usable half-bands either side of the capture centre are
/// kept, skipping `guard` around the centre itself.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeWindow {
    pub start_mhz: f64,
    pub stop_mhz: f64,
    pub guard: Hertz,
    pub bandwidth: Hertz,
    /// Report merged levels above this.
    pub alert_level: Option<f32>,
}

impl MergeWindow {
    fn keeps(&self, centre: f64, freq: f64) -> bool {
        if !(self.start_mhz <= freq && freq < self.stop_mhz) {
            return false;
        }
        let guard = self.guard.as_mhz();
        let half = self.bandwidth.as_mhz() / 2.0;
        let offset = freq - centre;
        (guard..=guard + half).contains(&offset) || (-guard - half..=-guard).contains(&offset)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Whether any point was written.
    pub updated: bool,
    /// Strongest averaged `(MHz, dB)` above the alert level.
    pub alert: Option<(f64, f32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectrumStore {
    sweeps: Vec<(Timestamp, Slice)>,
}

impl SpectrumStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sweeps.
    pub fn len(&self) -> usize {
        self.sweeps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sweeps.is_empty()
    }

    pub fn clear(&mut self) {
        self.sweeps.clear();
    }

    /// Sweeps in acquisition order.
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, &Slice)> + '_ {
        self.sweeps.iter().map(|(timestamp, slice)| (*timestamp, slice))
    }

    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.sweeps.iter().map(|(timestamp, _)| *timestamp)
    }

    pub fn get(&self, timestamp: Timestamp) -> Option<&Slice> {
        self.position(timestamp).map(|i| &self.sweeps[i].1)
    }

    /// Timestamp of the first sweep acquired.
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.sweeps.first().map(|(timestamp, _)| *timestamp)
    }

    /// The sweep with the greatest timestamp.
    pub fn latest(&self) -> Option<(Timestamp, &Slice)> {
        self.iter().reduce(|best, sweep| if sweep.0 > best.0 { sweep } else { best })
    }

    fn position(&self, timestamp: Timestamp) -> Option<usize> {
        self.sweeps.iter().position(|(t, _)| *t == timestamp)
    }

    /// Insert a sweep, replacing any already held under `timestamp`.
    pub fn merge(&mut self, timestamp: Timestamp, slice: Slice) {
        match self.position(timestamp) {
            Some(i) => self.sweeps[i].1 = slice,
            None => self.sweeps.push((timestamp, slice)),
        }
    }

    /// Fold one capture centred on `centre` into the sweep at `timestamp`.
    ///
    /// Points outside the window's half-bands are dropped; a point already
    /// present is averaged with the new level. Alerts come from averaged
    /// points only.
    pub fn accumulate(&mut self, timestamp: Timestamp, centre: Hertz, capture: &Slice, window: &MergeWindow) -> MergeOutcome {
        let index = match self.position(timestamp) {
            Some(i) => i,
            None => {
                self.sweeps.push((timestamp, Slice::new()));
                self.sweeps.len() - 1
            }
        };
        let sweep = &mut self.sweeps[index].1;
        let centre = centre.as_mhz();

        let mut outcome = MergeOutcome::default();
        for (bin, level) in capture.iter() {
            if !window.keeps(centre, bin.mhz()) {
                continue;
            }
            outcome.updated = true;
            let Some(existing) = sweep.get_mut(bin) else {
                sweep.insert(bin, level);
                continue;
            };
            *existing = (*existing + level) / 2.0;
            let merged = *existing;

            // Only averaged points alert; a lone first reading does not
            if let Some(alert_level) = window.alert_level
                && merged > alert_level
                && outcome.alert.is_none_or(|(_, strongest)| merged > strongest)
            {
                outcome.alert = Some((bin.mhz(), merged));
            }
        }
        outcome
    }

    /// Total points across all sweeps.
    pub fn count_points(&self) -> usize {
        self.sweeps.iter().map(|(_, slice)| slice.len()).sum()
    }

    pub fn extent(&self) -> Option<Extent> {
        Extent::new(self)
    }

    /// Decimate so that at most about `limit` points remain.
    ///
    /// Each sweep keeps its share of the limit, evenly spaced; a non-empty
    /// sweep whose share rounds to nothing keeps its first point while the
    /// limit allows.
    pub fn reduce(&self, limit: usize) -> SpectrumStore {
        let total = self.count_points();
        if total < limit {
            return self.clone();
        }

        let ratio = total as f64 / limit as f64;
        let mut counts: Vec<usize> = self
            .sweeps
            .iter()
            .map(|(_, slice)| (slice.len() as f64 / ratio) as usize)
            .collect();
        let mut kept: usize = counts.iter().sum();
        for (count, (_, slice)) in counts.iter_mut().zip(&self.sweeps) {
            if kept >= limit {
                break;
            }
            if *count == 0 && !slice.is_empty() {
                *count = 1;
                kept += 1;
            }
        }

        let sweeps = self
            .sweeps
            .iter()
            .zip(counts)
            .map(|((timestamp, slice), count)| {
                let points: Vec<(FreqBin, f32)> = slice.iter().collect();
                let reduced: Slice = (0..count)
                    .map(|i| points[(i as f64 * ratio) as usize])
                    .collect();
                (*timestamp, reduced)
            })
            .collect();
        SpectrumStore { sweeps }
    }

    /// Points in `[start, end]` MHz from the newest sweep at or before
    /// `timestamp`.
    ///
    /// A sweep that does not reach across the window (one still being
    /// acquired) gives way to the sweep before it.
    pub fn slice_at(&self, timestamp: Timestamp, start: f64, end: f64) -> Option<Vec<(f64, f32)>> {
        let mut candidates: Vec<(Timestamp, &Slice)> =
            self.iter().filter(|(t, _)| *t <= timestamp).collect();
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let covers = |slice: &Slice| {
            matches!((slice.min_freq(), slice.max_freq()), (Some(lo), Some(hi)) if lo <= start && hi >= end)
        };
        let (_, slice) = candidates
            .iter()
            .find(|(_, slice)| covers(slice))
            .or_else(|| candidates.first())?;
        Some(slice.window(start, end))
    }

    /// Sweeps newest first.
    pub fn sorted_view(&self) -> Vec<(Timestamp, &Slice)> {
        let mut view: Vec<_> = self.iter().collect();
        view.sort_by(|a, b| b.0.total_cmp(&a.0));
        view
    }

    /// Drop all but the newest `count` sweeps.
    pub fn retain_latest(&mut self, count: usize) {
        if self.sweeps.len() <= count {
            return;
        }
        if count == 0 {
            self.sweeps.clear();
            return;
        }
        let mut newest: Vec<Timestamp> = self.timestamps().collect();
        newest.sort_by(|a, b| b.total_cmp(a));
        let cutoff = newest[count - 1];
        self.sweeps.retain(|(timestamp, _)| *timestamp >= cutoff);
    }

    /// Each sweep minus the one acquired before it, over shared bins. The
    /// first sweep is dropped.
    pub fn diff(&self) -> SpectrumStore {
        let sweeps = self
            .sweeps
            .windows(2)
            .map(|pair| (pair[1].0, difference(&pair[1].1, &pair[0].1)))
            .collect();
        SpectrumStore { sweeps }
    }

    /// Each sweep minus the first sweep, over shared bins.
    pub fn delta(&self) -> SpectrumStore {
        let Some((_, first)) = self.sweeps.first() else {
            return SpectrumStore::new();
        };
        let sweeps = self
            .sweeps
            .iter()
            .map(|(timestamp, slice)| (*timestamp, difference(slice, first)))
            .collect();
        SpectrumStore { sweeps }
    }

    /// Local maxima of the newest sweep at or above `threshold` dB, ascending
    /// in frequency.
    pub fn peaks(&self, threshold: f32) -> Vec<(f64, f32)> {
        let Some((_, slice)) = self.latest() else {
            return Vec::new();
        };
        let points: Vec<(FreqBin, f32)> = slice.iter().collect();
        (0..points.len())
            .filter(|&i| {
                let level = points[i].1;
                let left = i.checked_sub(1).map_or(f32::NEG_INFINITY, |j| points[j].1);
                let right = points.get(i + 1).map_or(f32::NEG_INFINITY, |p| p.1);
                level >= threshold && level > left && level >= right
            })
            .map(|i| (points[i].0.mhz(), points[i].1))
            .collect()
    }
}

fn difference(slice: &Slice, base: &Slice) -> Slice {
    slice
        .iter()
        .filter_map(|(bin, level)| base.get(bin).map(|previous| (bin, level - previous)))
        .collect()
}
