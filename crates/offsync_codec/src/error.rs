//! Error types for the codec layer.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting values across the typed boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value does not match the declared type of its column.
    #[error("type mismatch for column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Column whose declared type was violated.
        column: String,
        /// The declared column type.
        expected: &'static str,
        /// What the value actually was.
        actual: String,
    },

    /// A column definition used an unrecognized type token.
    #[error("unknown column type '{token}'")]
    UnknownColumnType {
        /// The offending token.
        token: String,
    },

    /// A record identifier violates the identifier rules.
    #[error("invalid record id: {message}")]
    InvalidId {
        /// Description of the violation.
        message: String,
    },

    /// A stored or wire date could not be interpreted.
    #[error("invalid date value: {text}")]
    InvalidDate {
        /// The value that failed to parse.
        text: String,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(
        column: impl Into<String>,
        expected: &'static str,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected,
            actual: actual.into(),
        }
    }

    /// Creates an invalid id error.
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }
}
