//! Error types for the carving engine

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for carving operations
pub type CarveResult<T> = Result<T, CarveError>;

/// Errors that can occur while reading, scanning or rescanning input
#[derive(Debug, Error)]
pub enum CarveError {
    /// Offset/length pair outside the addressed range
    #[error("Invalid range: offset {offset} length {length} (available {available})")]
    InvalidRange {
        offset: u64,
        length: u64,
        available: u64,
    },
    /// Argument rejected at the call boundary
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Buffered reader configured below the minimum size
    #[error("Buffer size {requested} is below the minimum of {minimum} bytes")]
    BufferTooSmall { requested: usize, minimum: usize },
    /// Reader used after `release()`
    #[error("Reader used after release")]
    ReaderReleased,
    /// Required field missing when building a detection result
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// Underlying source unreadable
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Detector reported a failure of its own
    #[error("Detector '{detector}' failed: {message}")]
    Detector { detector: String, message: String },
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
    /// Report could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Rescanned result differs from the original detection
    #[error("Detector '{detector}' is not deterministic: {reason}")]
    Inconsistent { detector: String, reason: String },
    /// Allocation refused while buffering data
    #[error("Resource exhausted allocating {requested} bytes")]
    ResourceExhausted { requested: u64 },
    /// Caller requested cancellation
    #[error("Operation cancelled")]
    Cancelled,
}

impl CarveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CarveError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_range(offset: u64, length: u64, available: u64) -> Self {
        CarveError::InvalidRange {
            offset,
            length,
            available,
        }
    }

    /// True for the cancellation pseudo-error
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CarveError::Cancelled)
    }

    /// True when a scan should drop the failing detector and carry on with
    /// the remaining ones instead of aborting
    pub fn skips_detector(&self) -> bool {
        matches!(
            self,
            CarveError::Io { .. }
                | CarveError::Detector { .. }
                | CarveError::InvalidRange { .. }
                | CarveError::MissingField(_)
                | CarveError::InvalidArgument(_)
        )
    }
}

/// Try to reserve `additional` bytes in `buf`, mapping allocation failure
/// onto `CarveError::ResourceExhausted`
pub(crate) fn try_reserve(buf: &mut Vec<u8>, additional: usize) -> CarveResult<()> {
    buf.try_reserve_exact(additional)
        .map_err(|_| CarveError::ResourceExhausted {
            requested: additional as u64,
        })
}
