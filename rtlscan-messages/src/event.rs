use crate::{Slice, Timestamp, TunerType};
use num_complex::Complex;
use std::sync::Arc;

/// A captured block of IQ samples, shared between the caller and the estimator.
pub type SampleBlock = Arc<Vec<Complex<f32>>>;

/// Status events sent from a sweep to its owner.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// The sweep has been created.
    Starting,
    /// Number of capture steps the sweep will take.
    StepCount(usize),
    /// The tuner is open.
    TunerInfo(TunerType),
    /// Percentage of the range covered so far.
    Progress(f64),
    /// Raw capture at a nominal tuner frequency (Hz).
    Data {
        timestamp: Timestamp,
        freq: f64,
        samples: SampleBlock,
    },
    /// Capture converted to a binned power slice.
    Processed {
        timestamp: Timestamp,
        freq: f64,
        slice: Slice,
    },
    /// A transient fault was hit; the tuner is being reopened and the step retried.
    Retrying {
        freq: f64,
        attempt: u32,
        message: String,
    },
    /// Something non-fatal the caller may want to show.
    Warning(String),
    /// A merged level exceeded the alert threshold.
    Alert { freq: f64, level: f32 },
    /// Fatal error; the sweep has terminated.
    Error(String),
    /// The sweep was cancelled.
    Stopped,
    /// The sweep covered the whole range.
    Finished { is_calibration: bool },
}

impl StatusEvent {
    /// Whether this event ends the sweep's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Error(_) | Self::Stopped | Self::Finished { .. }
        )
    }
}
