//! The store capability interface.

use offsync_codec::{Record, Value};

use crate::error::StoreResult;
use crate::query::Query;
use crate::schema::TableDefinition;

/// One entry of an atomic batch.
///
/// Batches are how a data mutation and its operation-log entry are tied
/// together: both are entries of the same batch and the whole batch is one
/// transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Insert-or-update one record by primary key.
    Upsert {
        /// Target table.
        table: String,
        /// The record to write; must carry a valid id.
        record: Record,
    },
    /// Delete one row by primary key. Deleting an absent row is a no-op.
    Delete {
        /// Target table.
        table: String,
        /// Id of the row to delete.
        id: Value,
    },
}

/// Result of a [`LocalStore::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// The matching records, deserialized to their declared column types.
    pub records: Vec<Record>,
    /// Total count over the query's filter, when the query requested it.
    pub total_count: Option<u64>,
}

/// Capability interface of a local table store.
///
/// The default implementation is [`SqliteStore`](crate::SqliteStore);
/// user-supplied stores implement the same contract. Every method is
/// atomic: either the whole operation is applied or none of it is.
pub trait LocalStore: Send + Sync {
    /// Defines a table or extends an existing one with new columns.
    ///
    /// Existing columns are never dropped or retyped; a definition that
    /// re-declares a column with a different type fails.
    fn define_table(&self, def: TableDefinition) -> StoreResult<()>;

    /// Returns the merged definition of a defined table.
    fn table_definition(&self, table: &str) -> StoreResult<TableDefinition>;

    /// Inserts or updates records by primary key, all in one transaction.
    fn upsert(&self, table: &str, records: Vec<Record>) -> StoreResult<()>;

    /// Returns the record with the given id, failing when absent.
    ///
    /// Id comparison is case-insensitive.
    fn lookup(&self, table: &str, id: &Value) -> StoreResult<Record>;

    /// Returns the record with the given id, or `None` when absent.
    fn try_lookup(&self, table: &str, id: &Value) -> StoreResult<Option<Record>>;

    /// Deletes the rows with the given ids, all in one transaction. Null
    /// entries in the id list are ignored.
    fn delete_ids(&self, table: &str, ids: &[Value]) -> StoreResult<()>;

    /// Resolves the query to a set of ids (ignoring its projection) and
    /// deletes those rows, all in one transaction.
    fn delete_matching(&self, query: &Query) -> StoreResult<()>;

    /// Executes a query and returns the matching records, plus the total
    /// count when the query requested one.
    fn read(&self, query: &Query) -> StoreResult<QueryResult>;

    /// Applies an ordered list of batch entries in one transaction.
    fn execute_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()>;

    /// Releases the underlying connection; subsequent operations fail.
    fn close(&self) -> StoreResult<()>;
}
