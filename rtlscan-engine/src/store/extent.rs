use rtlscan_messages::Timestamp;
use serde::{Deserialize, Serialize};

use super::SpectrumStore;

/// Bounds of everything held in a store, plus the peak of the newest sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub f_min: f64,
    pub f_max: f64,
    pub l_min: f32,
    pub l_max: f32,
    pub t_min: Timestamp,
    pub t_max: Timestamp,
    /// `(MHz, dB, timestamp)` of the strongest point of the newest sweep.
    pub peak: Option<(f64, f32, Timestamp)>,
}

impl Extent {
    /// `None` when the store holds no points at all.
    pub fn new(store: &SpectrumStore) -> Option<Self> {
        let mut extent: Option<Extent> = None;

        for (timestamp, slice) in store.iter() {
            let (Some(f_min), Some(f_max), Some(l_min), Some(l_max)) = (
                slice.min_freq(),
                slice.max_freq(),
                slice.min_level(),
                slice.max_level(),
            ) else {
                continue;
            };
            match &mut extent {
                Some(e) => {
                    e.f_min = e.f_min.min(f_min);
                    e.f_max = e.f_max.max(f_max);
                    e.l_min = e.l_min.min(l_min);
                    e.l_max = e.l_max.max(l_max);
                    e.t_min = e.t_min.min(timestamp);
                    e.t_max = e.t_max.max(timestamp);
                }
                None => {
                    extent = Some(Extent {
                        f_min,
                        f_max,
                        l_min,
                        l_max,
                        t_min: timestamp,
                        t_max: timestamp,
                        peak: None,
                    })
                }
            }
        }

        let mut extent = extent?;
        // Empty sweeps still count towards the time span
        for timestamp in store.timestamps() {
            extent.t_min = extent.t_min.min(timestamp);
            extent.t_max = extent.t_max.max(timestamp);
        }
        extent.peak = store
            .latest()
            .and_then(|(timestamp, slice)| slice.peak().map(|(f, l)| (f, l, timestamp)));
        Some(extent)
    }

    /// Frequency bounds, widened slightly when they coincide.
    pub fn freq_range(&self) -> (f64, f64) {
        if self.f_min == self.f_max {
            (self.f_min, self.f_max - 0.001)
        } else {
            (self.f_min, self.f_max)
        }
    }

    /// Level bounds, widened slightly when they coincide.
    pub fn level_range(&self) -> (f32, f32) {
        if self.l_min == self.l_max {
            (self.l_min, self.l_max - 0.001)
        } else {
            (self.l_min, self.l_max)
        }
    }
}
