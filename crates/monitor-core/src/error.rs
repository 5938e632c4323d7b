use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the ingestion monitor.
///
/// Missing or malformed external data is not an error: loaders and rules
/// recover from it locally. What remains here are bad arguments at the
/// outer boundary and broken internal contracts.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// A calendar date string was not `YYYY-MM-DD`.
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// The expected data directory does not exist.
    #[error("Data path not found: {0}")]
    DataPathNotFound(PathBuf),

    /// The detection cycle's own contract was broken.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Convenience alias used throughout the monitor crates.
pub type Result<T> = std::result::Result<T, MonitorError>;
