//! Structured error types for the Cyanea HMM engine.

use core::fmt;

use thiserror::Error;

/// How much of the training scratch space a requested shape would overflow.
///
/// Sizes of alpha, beta and gamma grow as `states * length`, xi grows as
/// `states * states * length`, so xi is always the first structure to
/// exceed the addressable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowLevel {
    /// Every `states * length` structure (alpha, beta, gamma, xi) overflows.
    All,
    /// Only the `states * states * length` xi structure overflows.
    XiOnly,
}

impl fmt::Display for OverflowLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "alpha, beta, gamma and xi"),
            Self::XiOnly => write!(f, "xi"),
        }
    }
}

/// Unified error type for all Cyanea operations.
#[derive(Debug, Error)]
pub enum CyaneaError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed model or sequence file)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, mismatched shapes, out-of-range symbols)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A scratch or output buffer could not be obtained
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// The requested dimensions would overflow buffer-size arithmetic
    #[error("dimension overflow: buffers for {0} cannot be addressed")]
    Overflow(OverflowLevel),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the Cyanea ecosystem.
pub type Result<T> = std::result::Result<T, CyaneaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_message_names_structures() {
        let err = CyaneaError::Overflow(OverflowLevel::XiOnly);
        assert_eq!(
            err.to_string(),
            "dimension overflow: buffers for xi cannot be addressed"
        );
        let err = CyaneaError::Overflow(OverflowLevel::All);
        assert!(err.to_string().contains("alpha, beta, gamma and xi"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.hmm");
        let err: CyaneaError = io.into();
        assert!(matches!(err, CyaneaError::Io(_)));
    }
}
