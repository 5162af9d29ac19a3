//! Error types for the talus backend.
//!
//! Every pass in the pipeline reports failure through [`BackendError`].
//! All errors are fatal: the backend never tries to recover from a broken
//! module, it surfaces the failing pass and context to the caller.

use std::error::Error;
use std::fmt;

/// Main error type for the backend pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Malformed input IR: missing operand, use of an undefined register,
    /// an opcode the lowering does not accept.
    InvalidIr(String),
    /// A construct the selected target cannot express.
    Unsupported(String),
    /// The register allocator ran out of scratch registers while rewriting
    /// spills; the function has unspillable pressure.
    ResourceExhaustion(String),
    /// An internal invariant was broken; indicates a bug in a pass.
    Internal(String),
    /// The requested target name is not registered.
    UnknownTarget(String),
    /// I/O errors on the output sink.
    Io(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::InvalidIr(msg) => write!(f, "invalid IR: {}", msg),
            BackendError::Unsupported(msg) => write!(f, "unsupported construct: {}", msg),
            BackendError::ResourceExhaustion(msg) => write!(f, "resource exhaustion: {}", msg),
            BackendError::Internal(msg) => write!(f, "internal error: {}", msg),
            BackendError::UnknownTarget(name) => write!(f, "unknown target: {}", name),
            BackendError::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BackendError::InvalidIr("use of undefined register r7".to_string());
        assert_eq!(err.to_string(), "invalid IR: use of undefined register r7");

        let err = BackendError::UnknownTarget("mips".to_string());
        assert_eq!(err.to_string(), "unknown target: mips");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: BackendError = io.into();
        assert!(matches!(err, BackendError::Io(_)));
    }
}
