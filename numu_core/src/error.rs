//! Error types for the reconstruction core.

use thiserror::Error;

/// Errors raised by the reconstruction core.
///
/// Only configuration problems are errors: per-event inputs that are missing
/// or unmatched degrade to empty / unset values instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecoError {
    /// Invalid configuration detected before any event was processed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A calibration table that is not strictly increasing
    #[error("Calibration table '{0}' is not monotonic")]
    NonMonotonicCalibration(&'static str),
}

impl RecoError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
