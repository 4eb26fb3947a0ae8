//! Data shared between the acquisition engine and its callers.

mod device;
mod event;
mod spectrum;
mod state;
mod sweep;
mod units;

pub use device::{BANDWIDTH, DEFAULT_PORT, DeviceDescriptor, SAMPLE_RATE, TunerIdentity, TunerType};
pub use event::{SampleBlock, StatusEvent};
pub use spectrum::{BINS_PER_MHZ, FreqBin, Slice, Timestamp};
pub use state::SweepState;
pub use sweep::{RangeError, SweepRange};
pub use units::{Decibels, Hertz};
