//! Error taxonomy for blur processing.
//!
//! Three classes of failure exist:
//!
//! - [`BlurError::InvalidState`]: the processor was asked to blur with no
//!   source image bound. A programmer error, raised immediately.
//! - [`BlurError::InvalidImage`]: an image or raw buffer could not be turned
//!   into a [`PixelBuffer`](crate::pixel_buffer::PixelBuffer).
//! - [`BlurError::Processing`]: a pixel-processing failure inside the kernel.
//!   Asynchronous jobs report these only through the delivery channels, as a
//!   numeric code (see [`ProcessingCode::code`]).
//! - [`BlurError::WorkerSpawn`]: the queue could not start its worker.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BlurError>;

/// Why a processor is in a state that cannot serve a blur request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateReason {
    /// No image is bound to the processor.
    NoImageSet,
}

impl fmt::Display for InvalidStateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidStateReason::NoImageSet => f.write_str("no image set"),
        }
    }
}

/// Low-level processing failure codes.
///
/// Numbering follows the vImage error codes so that values delivered to
/// sinks stay comparable with the ones hosts already know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingCode {
    AllocationFailed,
    InvalidParameter,
    BufferSizeMismatch,
    InvalidImageFormat,
}

impl ProcessingCode {
    /// Stable numeric code carried by error deliveries.
    pub fn code(self) -> i64 {
        match self {
            ProcessingCode::AllocationFailed => -21771,
            ProcessingCode::InvalidParameter => -21773,
            ProcessingCode::BufferSizeMismatch => -21774,
            ProcessingCode::InvalidImageFormat => -21778,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -21771 => Some(ProcessingCode::AllocationFailed),
            -21773 => Some(ProcessingCode::InvalidParameter),
            -21774 => Some(ProcessingCode::BufferSizeMismatch),
            -21778 => Some(ProcessingCode::InvalidImageFormat),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingCode::AllocationFailed => "memory allocation failed",
            ProcessingCode::InvalidParameter => "invalid parameter",
            ProcessingCode::BufferSizeMismatch => "buffer size mismatch",
            ProcessingCode::InvalidImageFormat => "invalid image format",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlurError {
    #[error("invalid state: {0}")]
    InvalidState(InvalidStateReason),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("processing error: {0}")]
    Processing(ProcessingCode),
    #[error("failed to start worker thread: {0}")]
    WorkerSpawn(String),
}

impl BlurError {
    /// Numeric code used when this error is reported through a sink.
    ///
    /// Image conversion failures are reported as
    /// [`ProcessingCode::InvalidImageFormat`].
    pub fn processing_code(&self) -> ProcessingCode {
        match self {
            BlurError::Processing(code) => *code,
            BlurError::InvalidImage(_) => ProcessingCode::InvalidImageFormat,
            BlurError::InvalidState(_) => ProcessingCode::InvalidParameter,
            BlurError::WorkerSpawn(_) => ProcessingCode::AllocationFailed,
        }
    }
}

impl From<std::collections::TryReserveError> for BlurError {
    fn from(_: std::collections::TryReserveError) -> Self {
        BlurError::Processing(ProcessingCode::AllocationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in [
            ProcessingCode::AllocationFailed,
            ProcessingCode::InvalidParameter,
            ProcessingCode::BufferSizeMismatch,
            ProcessingCode::InvalidImageFormat,
        ] {
            assert_eq!(ProcessingCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ProcessingCode::from_code(0), None);
    }

    #[test]
    fn test_display() {
        let e = BlurError::InvalidState(InvalidStateReason::NoImageSet);
        assert_eq!(e.to_string(), "invalid state: no image set");
        let e = BlurError::Processing(ProcessingCode::AllocationFailed);
        assert_eq!(
            e.to_string(),
            "processing error: memory allocation failed (-21771)"
        );
    }

    #[test]
    fn test_invalid_image_maps_to_format_code() {
        let e = BlurError::InvalidImage("zero width".into());
        assert_eq!(e.processing_code(), ProcessingCode::InvalidImageFormat);
    }
}
