//! # Offsync Store
//!
//! Transactional, typed record storage for the offsync engine.
//!
//! This crate provides:
//! - the [`LocalStore`] capability trait every store implementation honors
//! - the default SQLite-backed implementation, [`SqliteStore`]
//! - the in-memory [`SchemaRegistry`] that types all reads and writes
//! - the pure [`translate`] step turning a structured [`Query`] into
//!   parameterized statements
//!
//! All access to a store is serialized through a single writer queue; see
//! [`SqliteStore`] for the concurrency contract.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod query;
mod schema;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use query::{translate, CompareOp, Filter, OrderBy, Query, SortDir, SqlStatement};
pub use schema::{SchemaRegistry, TableDefinition, MAX_TABLE_COLUMNS};
pub use sqlite::SqliteStore;
pub use store::{BatchOp, LocalStore, QueryResult};
