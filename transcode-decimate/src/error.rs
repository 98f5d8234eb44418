//! Error types for frame decimation.

use thiserror::Error;

/// Decimation error types.
#[derive(Error, Debug)]
pub enum DecimateError {
    /// Invalid configuration parameters.
    #[error("Invalid decimation parameters: {0}")]
    InvalidParameters(String),

    /// Pixel format or bit depth not supported.
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Frame dimensions mismatch.
    #[error("Frame dimensions mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}")]
    DimensionMismatch {
        /// Expected width in pixels.
        expected_width: u32,
        /// Expected height in pixels.
        expected_height: u32,
        /// Actual width in pixels.
        actual_width: u32,
        /// Actual height in pixels.
        actual_height: u32,
    },

    /// A strictly sequential mode was driven out of order.
    #[error("Non-linear access detected: expected frame {expected}, got {requested}")]
    NonLinearAccess {
        /// Next output index the engine can serve.
        expected: usize,
        /// Index that was requested.
        requested: usize,
    },

    /// The sequential stream has no more output frames.
    #[error("End of stream reached (last frame = {last_frame})")]
    EndOfStream {
        /// Last output index that was produced.
        last_frame: usize,
    },

    /// A declared frame dependency could not be fetched.
    #[error("Frame {0} is not available from the source")]
    FrameUnavailable(usize),

    /// An internal invariant was violated.
    #[error("Internal decimation error: {0}")]
    Internal(String),

    /// A side file could not be parsed.
    #[error("{file} line {line}: {message}")]
    Parse {
        /// Kind of file being parsed.
        file: &'static str,
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A metrics file was produced with incompatible settings.
    #[error("Metrics file header mismatch: {0}")]
    HeaderMismatch(String),

    /// I/O error while reading or writing a side file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for decimation operations.
pub type Result<T> = std::result::Result<T, DecimateError>;

impl DecimateError {
    /// Create an invalid parameters error.
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    /// Create an unsupported format error.
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create an internal invariant error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a parse error for the given file kind and line.
    pub fn parse(file: &'static str, line: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            file,
            line,
            message: msg.into(),
        }
    }

    /// Check if this error is recoverable.
    ///
    /// Only a missing dependency can be retried by re-driving the request
    /// once the host has the frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::FrameUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecimateError::invalid_params("cycleR must be less than cycle");
        assert_eq!(
            err.to_string(),
            "Invalid decimation parameters: cycleR must be less than cycle"
        );
    }

    #[test]
    fn test_parse_error_display() {
        let err = DecimateError::parse("ovr", 12, "invalid specifier");
        assert_eq!(err.to_string(), "ovr line 12: invalid specifier");
    }

    #[test]
    fn test_non_linear_access() {
        let err = DecimateError::NonLinearAccess {
            expected: 10,
            requested: 4,
        };
        assert!(err.to_string().contains("expected frame 10"));
        assert!(err.to_string().contains("got 4"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(DecimateError::FrameUnavailable(3).is_recoverable());
        assert!(!DecimateError::EndOfStream { last_frame: 9 }.is_recoverable());
        assert!(!DecimateError::internal("no frame to return").is_recoverable());
    }
}
