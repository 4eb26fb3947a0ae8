use serde::{Deserialize, Serialize};

/// Lifecycle of a single sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    Starting,
    Sweeping,
    Finished,
    Stopped,
    ErrorTerminated,
}

impl SweepState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::ErrorTerminated)
    }
}
