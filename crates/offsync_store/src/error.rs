//! Error types for the local table store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local table store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying engine error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Value conversion failed.
    #[error("codec error: {0}")]
    Codec(#[from] offsync_codec::CodecError),

    /// The table has not been defined.
    #[error("table not defined: {name}")]
    UnknownTable {
        /// Name of the table.
        name: String,
    },

    /// A record referenced a column the table does not declare.
    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn {
        /// Table being written.
        table: String,
        /// The undeclared column.
        column: String,
    },

    /// A table definition is structurally invalid.
    #[error("invalid table definition: {message}")]
    InvalidDefinition {
        /// Description of the problem.
        message: String,
    },

    /// A redefinition tried to change the type of an existing column.
    #[error("column '{column}' of table '{table}' already exists with a different type")]
    ColumnTypeChanged {
        /// The table being redefined.
        table: String,
        /// The conflicting column.
        column: String,
    },

    /// A definition exceeds the engine's parameter-per-statement bound.
    #[error("table '{table}' declares {count} columns, limit is {max}")]
    TooManyColumns {
        /// The table being defined.
        table: String,
        /// Declared column count.
        count: usize,
        /// Maximum supported columns.
        max: usize,
    },

    /// No row matched the requested id.
    #[error("no record with id '{id}' in table '{table}'")]
    NotFound {
        /// Table searched.
        table: String,
        /// The id that was not found.
        id: String,
    },

    /// An argument was invalid for the requested operation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }

    /// Creates an invalid definition error.
    pub fn invalid_definition(message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// True when the error is a not-found miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
