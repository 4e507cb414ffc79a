//! The dynamic record shape.

use std::collections::BTreeMap;

use crate::value::Value;

/// A record: a mapping from column name to typed scalar.
///
/// Every record carries a primary key under [`system::ID`].
pub type Record = BTreeMap<String, Value>;

/// Well-known column names.
pub mod system {
    /// Primary key column, present on every record.
    pub const ID: &str = "id";
    /// Server-assigned creation instant.
    pub const CREATED_AT: &str = "createdAt";
    /// Server-assigned last-update instant; drives incremental pull.
    pub const UPDATED_AT: &str = "updatedAt";
    /// Opaque server version token used for optimistic concurrency.
    pub const VERSION: &str = "version";
    /// Soft-delete marker reported by the server.
    pub const DELETED: &str = "deleted";
}

/// Returns the record's id value, if present and non-null.
pub fn record_id(record: &Record) -> Option<&Value> {
    record.get(system::ID).filter(|v| !v.is_null())
}
