use std::io;
use thiserror::Error;

/// Coarse classification of every [`EdfError`].
///
/// Callers that only care about *why* an operation failed (bad file, bad
/// numbers, bad call, or the filesystem) can match on this instead of the
/// individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A header field failed to parse, the version marker is wrong or the
    /// file is truncated.
    Format,
    /// Digital/physical limits are inverted or a sample overflows its range.
    Range,
    /// The caller passed inconsistent arguments.
    Argument,
    /// Underlying filesystem failure.
    Io,
}

#[derive(Debug, Error)]
pub enum EdfError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid header field `{field}`: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Truncated file: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Invalid number of signals: {0}")]
    InvalidSignalCount(i64),

    #[error("Invalid range for {field}: {reason}")]
    InvalidRange { field: String, reason: String },

    #[error("Sample {value} of signal `{signal}` is outside {min}..={max}")]
    SampleOverflow {
        signal: String,
        value: f64,
        min: i64,
        max: i64,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Signal index {0} out of range")]
    InvalidSignalIndex(usize),

    #[error("Unknown channel label: {0}")]
    UnknownChannel(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),
}

impl EdfError {
    pub(crate) fn format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EdfError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn range(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EdfError::InvalidRange {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EdfError::Io(_) => ErrorKind::Io,
            EdfError::InvalidFormat { .. }
            | EdfError::Truncated { .. }
            | EdfError::UnsupportedFileType(_)
            | EdfError::InvalidSignalCount(_)
            | EdfError::VerificationFailed(_) => ErrorKind::Format,
            EdfError::InvalidRange { .. } | EdfError::SampleOverflow { .. } => ErrorKind::Range,
            EdfError::InvalidArgument(_)
            | EdfError::InvalidSignalIndex(_)
            | EdfError::UnknownChannel(_) => ErrorKind::Argument,
        }
    }
}

pub type Result<T> = std::result::Result<T, EdfError>;
