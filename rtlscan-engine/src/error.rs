//! Error types for the acquisition engine.
//!
//! Tuner failures are classified so the sweep controller can tell a flaky
//! device (reopen and retry) from a caller mistake (terminate).

use std::io;
use thiserror::Error;

/// Failures raised by a tuner backend.
#[derive(Error, Debug)]
pub enum TunerError {
    /// Opening the device or connecting to the server failed
    #[error("Connection error: {0}")]
    Connect(String),

    /// Read, tune or socket failure mid-sweep; recovered by reopening
    #[error("I/O error: {0}")]
    TransientIo(#[from] io::Error),

    /// Invalid argument or internal contract violation
    #[error("{0}")]
    Programming(String),

    /// Malformed handshake or unexpected data from a remote tuner
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TunerError {
    /// Whether reopening the tuner and retrying the step may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Whether a failed reopen mid-sweep is worth trying again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::Connect(_))
    }

    pub(crate) fn device(message: impl std::fmt::Display) -> Self {
        Self::TransientIo(io::Error::other(message.to_string()))
    }
}

/// Errors returned by the scanner facade.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A sweep is already in progress on this scanner
    #[error("A sweep is already running")]
    SweepRunning,

    /// Sweep parameters rejected before starting
    #[error("Invalid sweep: {0}")]
    InvalidSweep(String),

    /// Failed to spawn a thread
    #[error("Thread error: {0}")]
    Thread(#[from] io::Error),
}

/// Convenience Result type for tuner operations
pub type Result<T> = std::result::Result<T, TunerError>;
