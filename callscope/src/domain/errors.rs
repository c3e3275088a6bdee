//! Structured error types for callscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::ThreadId;
use thiserror::Error;

/// Failure while decoding a binary event frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated frame: needed {needed} bytes at offset {offset}, frame has {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidString { offset: usize },

    #[error("Invalid parameter type {tag:#04x} at offset {offset}")]
    InvalidParameter { tag: u8, offset: usize },
}

/// A stack sample that contradicts the known thread lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplingError {
    #[error("{0} received a sample after it terminated")]
    ThreadTerminated(ThreadId),

    #[error("{thread} moved back to state {state}")]
    InvalidState { thread: ThreadId, state: String },
}

/// No profiling data was recorded yet
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("No profiling data available")]
pub struct NoDataAvailable;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to parse recording line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Recording is empty (missing header line)")]
    Empty,

    #[error("Recording line {line} does not match a {format} recording")]
    UnexpectedRecord { line: usize, format: &'static str },

    #[error(transparent)]
    Sampling(#[from] SamplingError),

    #[error(transparent)]
    NoData(#[from] NoDataAvailable),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
