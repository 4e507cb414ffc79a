//! Error types for the sync engine.

use thiserror::Error;

use crate::transport::TransportError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] offsync_store::StoreError),

    /// Value conversion error.
    #[error("codec error: {0}")]
    Codec(#[from] offsync_codec::CodecError),

    /// Remote call failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The sync context has not been initialized.
    #[error("sync context is not initialized")]
    NotInitialized,

    /// Bad arguments to a public operation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// Insert of an id that is already present.
    #[error("an item with id '{id}' already exists in table '{table}'")]
    ItemAlreadyExists {
        /// Target table.
        table: String,
        /// The conflicting id.
        id: String,
    },

    /// Update or delete of an id that is absent.
    #[error("no item with id '{id}' in table '{table}'")]
    ItemNotFound {
        /// Target table.
        table: String,
        /// The missing id.
        id: String,
    },

    /// The operation would touch a table that still has pending operations.
    #[error("table '{table}' has pending operations")]
    PendingOperations {
        /// The table with pending work.
        table: String,
    },

    /// A local mutation raced the operation currently being pushed.
    #[error("the pending operation for id '{id}' in table '{table}' is being pushed")]
    OperationLocked {
        /// Target table.
        table: String,
        /// The id whose operation is locked.
        id: String,
    },

    /// A resolution verb was misused.
    #[error("resolution error: {message}")]
    Resolution {
        /// Description of the misuse.
        message: String,
    },

    /// Internal invariant violation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violation.
        message: String,
    },
}

impl SyncError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a resolution error.
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the error reports a version conflict from the server.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Transport(t) if t.is_conflict())
    }
}
