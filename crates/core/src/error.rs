//! Error types for quire PDF reading.

use thiserror::Error;

/// Primary error type for PDF reading operations.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Structural violation that makes the document unopenable.
    #[error("malformed file: {0}")]
    MalformedFile(String),

    /// No recognizable object at a position.
    #[error("malformed object at position {pos}: {msg}")]
    MalformedObject { pos: usize, msg: String },

    /// Recognized structure that this reader does not implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The parser ran off the end of the current window before the end of file.
    ///
    /// `needed` is a lower bound on the window length (relative to the window
    /// start) required for the retry to make progress.
    #[error("window exhausted, need at least {needed} bytes")]
    Truncated { needed: usize },

    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reader has been disposed")]
    Disposed,
}

impl PdfError {
    pub(crate) fn malformed(pos: usize, msg: impl Into<String>) -> Self {
        Self::MalformedObject {
            pos,
            msg: msg.into(),
        }
    }

    /// True when the failure is only a signal to grow the window and retry.
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Convenience Result type alias for PdfError.
pub type Result<T> = std::result::Result<T, PdfError>;
