//! Measurements over a frequency window of the newest sweep.

use rtlscan_messages::Decibels;
use serde::{Deserialize, Serialize};

use super::SpectrumStore;

/// Fraction of total power left outside each edge of the occupied bandwidth.
const OBW_EDGE: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub start: f64,
    pub end: f64,
    /// `(MHz, dB)` of the weakest point.
    pub min: (f64, f32),
    /// `(MHz, dB)` of the strongest point.
    pub max: (f64, f32),
    /// Mean power, dB.
    pub avg: f32,
    /// Geometric mean power, dB.
    pub gmean: f32,
    /// Geometric over arithmetic mean power, 0 to 1.
    pub flatness: f64,
    /// Edges where the level first drops 3 dB below the maximum.
    pub hbw: Option<(f64, f64)>,
    /// Edges enclosing 99% of the power.
    pub obw: Option<(f64, f64)>,
}

impl Measure {
    /// `None` if the newest sweep has no points in `[start, end]`.
    pub fn new(store: &SpectrumStore, start: f64, end: f64) -> Option<Self> {
        let (_, slice) = store.latest()?;
        Self::from_points(start, end, &slice.window(start, end))
    }

    fn from_points(start: f64, end: f64, points: &[(f64, f32)]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points.iter().fold((first, first), |(min, max), &point| {
            (
                if point.1 < min.1 { point } else { min },
                if point.1 > max.1 { point } else { max },
            )
        });

        let powers: Vec<f64> = points
            .iter()
            .map(|(_, level)| Decibels(*level).to_power())
            .collect();
        let count = powers.len() as f64;
        let mean = powers.iter().sum::<f64>() / count;
        let mean_db = points.iter().map(|(_, level)| f64::from(*level)).sum::<f64>() / count;
        let gmean = Decibels(mean_db as f32);
        let flatness = if mean > 0.0 { gmean.to_power() / mean } else { 0.0 };

        Some(Self {
            start,
            end,
            min,
            max,
            avg: Decibels::from_power(mean).as_db(),
            gmean: gmean.as_db(),
            flatness,
            hbw: half_power_bandwidth(points, max),
            obw: occupied_bandwidth(points, &powers),
        })
    }
}

fn half_power_bandwidth(points: &[(f64, f32)], max: (f64, f32)) -> Option<(f64, f64)> {
    let threshold = max.1 - 3.0;
    let peak = points.iter().position(|point| *point == max)?;

    let low = points[..=peak]
        .iter()
        .rev()
        .find(|(_, level)| *level < threshold)?
        .0;
    let high = points[peak..].iter().find(|(_, level)| *level < threshold)?.0;
    Some((low, high))
}

fn occupied_bandwidth(points: &[(f64, f32)], powers: &[f64]) -> Option<(f64, f64)> {
    let total: f64 = powers.iter().sum();
    if !(total > 0.0) {
        return None;
    }
    let edge = total * OBW_EDGE;

    let low = edge_index(powers, edge, 0..powers.len())?;
    let high = edge_index(powers, edge, (0..powers.len()).rev())?;
    Some((points[low].0, points[high].0))
}

/// First index, walking `indices`, at which the running power sum reaches
/// `edge`.
fn edge_index(powers: &[f64], edge: f64, indices: impl Iterator<Item = usize>) -> Option<usize> {
    let mut sum = 0.0;
    for i in indices {
        sum += powers[i];
        if sum >= edge {
            return Some(i);
        }
    }
    None
}
