//! Error codes for demosaicing and highlight reconstruction.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type HlResult<T> = Result<T, HighlightError>;

/// Errors reported by the reconstruction core.
///
/// All of these are recoverable by the caller. The caller-owned output buffer is
/// never written when one of them is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HighlightError {
    /// The image is smaller than the minimum stencil/tile extent.
    #[error("image too small: {width}x{height}, minimum is {min}x{min}")]
    TooSmallImage {
        /// Width of the offending image.
        width: usize,
        /// Height of the offending image.
        height: usize,
        /// Minimum accepted extent along either axis.
        min: usize,
    },
    /// A scratch or working buffer could not be allocated.
    #[error("out of memory: could not allocate {bytes} bytes")]
    OutOfMemory {
        /// Size of the failed allocation.
        bytes: usize,
    },
    /// Degenerate dimensions or mismatched buffer sizes.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A parameter is outside its accepted range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// The caller's cancellation hook asked to stop.
    #[error("processing cancelled")]
    Cancelled,
}

impl HighlightError {
    pub(crate) fn size_mismatch(what: &str, expected: usize, got: usize) -> Self {
        HighlightError::InvalidGeometry(format!(
            "{what} buffer: expected {expected} elements, got {got}"
        ))
    }
}
