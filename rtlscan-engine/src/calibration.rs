//! Frequency error estimation against a known carrier.

use crate::store::SpectrumStore;

/// Frequency error of the receiver in parts per million, measured from the
/// newest sweep of a calibration run around `reference_mhz`.
///
/// The strongest point is picked after weighting levels by distance from the
/// reference, so a stray carrier far from it cannot win. `None` if the store
/// holds no points.
pub fn estimate_ppm(store: &SpectrumStore, reference_mhz: f64) -> Option<f64> {
    let (_, slice) = store.latest()?;
    let (peak, _) = slice
        .points()
        .into_iter()
        .map(|(freq, level)| {
            let distance = (freq - reference_mhz).powi(2) + 1.0;
            (freq, distance * f64::from(level))
        })
        .fold(None, |best: Option<(f64, f64)>, point| match best {
            Some(best) if best.1 >= point.1 => Some(best),
            _ => Some(point),
        })?;

    Some((reference_mhz - peak) / reference_mhz * 1e6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtlscan_messages::Slice;

    #[test]
    fn test_offset_carrier() {
        let mut store = SpectrumStore::new();
        store.merge(
            1.0,
            Slice::from(vec![(99.9, -60.0), (99.9999, -10.0), (100.0, -40.0), (100.2, -55.0)]),
        );
        let ppm = estimate_ppm(&store, 100.0).unwrap();
        assert!((ppm - 1.0).abs() < 1e-6, "ppm {ppm}");
    }

    #[test]
    fn test_uses_newest_sweep() {
        let mut store = SpectrumStore::new();
        store.merge(2.0, Slice::from(vec![(100.0, -10.0), (100.001, -50.0)]));
        store.merge(1.0, Slice::from(vec![(100.0, -50.0), (100.001, -10.0)]));
        assert_eq!(estimate_ppm(&store, 100.0), Some(0.0));
    }

    #[test]
    fn test_empty_store() {
        assert_eq!(estimate_ppm(&SpectrumStore::new(), 100.0), None);
    }
}
