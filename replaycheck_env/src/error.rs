//! Error types for the ReplayCheck state codec.

use thiserror::Error;

/// Errors that can occur while walking state through the codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ran out before the walk finished, or bytes were left over.
    #[error("Corrupted state at {path} (offset {offset}): {reason}")]
    Corrupted {
        /// Field path being processed when corruption was detected
        path: String,

        /// Cursor offset in the input buffer
        offset: usize,

        /// Human readable description
        reason: String,
    },

    /// A field decoded to a value its type cannot hold (e.g. a bool byte of 7).
    #[error("Invalid value for {path}: {reason}")]
    InvalidValue {
        /// Field path of the offending value
        path: String,

        /// Human readable description
        reason: String,
    },
}

impl CodecError {
    /// Creates a corruption error.
    pub fn corrupted(
        path: impl std::fmt::Display,
        offset: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::Corrupted {
            path: path.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
