//! The default SQLite-backed store.

use offsync_codec::{
    deserialize, record_id, serialize, system, validate_id, Record, SqlScalar, Value,
};
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection, Transaction};
use std::path::Path;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::query::{translate, Query};
use crate::schema::{SchemaRegistry, TableDefinition};
use crate::store::{BatchOp, LocalStore, QueryResult};

/// The default [`LocalStore`] implementation, backed by an embedded SQLite
/// database.
///
/// # Concurrency
///
/// The connection sits behind a single mutex, which is the store's writer
/// queue: every public operation acquires it for its whole duration, so
/// callers interleave at operation granularity and transactional semantics
/// hold regardless of how many threads share the store. Readers serialize
/// on the same mutex because they share the same connection.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    schemas: SchemaRegistry,
}

impl SqliteStore {
    /// Opens (and creates when absent) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Opens a transient in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            schemas: SchemaRegistry::new(),
        }
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<R>) -> StoreResult<R> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }

    fn definition(&self, table: &str) -> StoreResult<TableDefinition> {
        self.schemas
            .get(table)
            .ok_or_else(|| StoreError::unknown_table(table))
    }

    /// Builds the upsert statement for one record, validating its id and
    /// serializing every column by its declared type.
    fn upsert_statement(
        def: &TableDefinition,
        record: &Record,
    ) -> StoreResult<(String, Vec<rusqlite::types::Value>)> {
        let id = record_id(record).ok_or_else(|| {
            StoreError::invalid_argument(format!("record for table '{}' has no id", def.name))
        })?;
        validate_id(id)?;

        let mut columns = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len());
        for (column, value) in record {
            let ty = def.column_type(column)?;
            columns.push(column.as_str());
            params.push(scalar_to_sql(serialize(column, value, ty)?));
        }

        let column_list = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates = columns
            .iter()
            .filter(|c| **c != system::ID)
            .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {updates}")
        };

        let sql = format!(
            "INSERT INTO \"{}\" ({column_list}) VALUES ({placeholders}) \
             ON CONFLICT(\"{}\") {conflict}",
            def.name,
            system::ID,
        );
        Ok((sql, params))
    }

    fn delete_statement(
        def: &TableDefinition,
        id: &Value,
    ) -> StoreResult<(String, rusqlite::types::Value)> {
        validate_id(id)?;
        let id_type = def.column_type(system::ID)?;
        let scalar = serialize(system::ID, id, id_type)?;
        let sql = format!("DELETE FROM \"{}\" WHERE \"{}\" = ?", def.name, system::ID);
        Ok((sql, scalar_to_sql(scalar)))
    }

    fn apply_batch(tx: &Transaction<'_>, stmts: &[(String, Vec<rusqlite::types::Value>)]) -> StoreResult<()> {
        for (sql, params) in stmts {
            tx.execute(sql, params_from_iter(params.iter().cloned()))?;
        }
        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn define_table(&self, def: TableDefinition) -> StoreResult<()> {
        def.validate()?;

        // Registry-level type check first so no DDL runs for a bad
        // redefinition.
        if let Some(existing) = self.schemas.get(&def.name) {
            for (column, &ty) in &def.columns {
                if let Some(&prior) = existing.columns.get(column) {
                    if prior != ty {
                        return Err(StoreError::ColumnTypeChanged {
                            table: def.name.clone(),
                            column: column.clone(),
                        });
                    }
                }
            }
        }

        let id_type = def
            .id_type()
            .ok_or_else(|| StoreError::invalid_definition("missing id column"))?;
        let id_decl = match id_type {
            offsync_codec::ColumnType::String => {
                format!("\"{}\" TEXT COLLATE NOCASE NOT NULL PRIMARY KEY", system::ID)
            }
            _ => format!("\"{}\" INTEGER NOT NULL PRIMARY KEY", system::ID),
        };

        let mut column_decls = vec![id_decl];
        for (column, ty) in &def.columns {
            if column != system::ID {
                column_decls.push(format!("\"{column}\" {}", ty.sql_decl()));
            }
        }

        let mut added = 0usize;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
                    def.name,
                    column_decls.join(", ")
                ),
                [],
            )?;

            // Columns already present in the engine: add what is missing,
            // reject declarations whose storage class no longer matches.
            let mut existing = Vec::new();
            {
                let mut stmt =
                    tx.prepare(&format!("PRAGMA table_info(\"{}\")", def.name))?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let name: String = row.get(1)?;
                    let decl: String = row.get(2)?;
                    existing.push((name, decl));
                }
            }

            for (column, ty) in &def.columns {
                match existing
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                {
                    Some((_, decl)) => {
                        let affinity = decl.split_whitespace().next().unwrap_or("");
                        let expected = ty.sql_decl().split_whitespace().next().unwrap_or("");
                        if !affinity.eq_ignore_ascii_case(expected) {
                            return Err(StoreError::ColumnTypeChanged {
                                table: def.name.clone(),
                                column: column.clone(),
                            });
                        }
                    }
                    None => {
                        tx.execute(
                            &format!(
                                "ALTER TABLE \"{}\" ADD COLUMN \"{column}\" {}",
                                def.name,
                                ty.sql_decl()
                            ),
                            [],
                        )?;
                        added += 1;
                    }
                }
            }

            tx.commit()?;
            Ok(())
        })?;

        self.schemas.register(&def)?;
        debug!(table = %def.name, columns = def.columns.len(), added, "table defined");
        Ok(())
    }

    fn table_definition(&self, table: &str) -> StoreResult<TableDefinition> {
        self.definition(table)
    }

    fn upsert(&self, table: &str, records: Vec<Record>) -> StoreResult<()> {
        let def = self.definition(table)?;

        // Validate and serialize everything before touching the engine so a
        // bad record reports without any state change.
        let mut stmts = Vec::with_capacity(records.len());
        for record in &records {
            stmts.push(Self::upsert_statement(&def, record)?);
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            Self::apply_batch(&tx, &stmts)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn lookup(&self, table: &str, id: &Value) -> StoreResult<Record> {
        self.try_lookup(table, id)?
            .ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
                id: offsync_codec::id_to_text(id).unwrap_or_else(|_| format!("{id:?}")),
            })
    }

    fn try_lookup(&self, table: &str, id: &Value) -> StoreResult<Option<Record>> {
        let def = self.definition(table)?;
        validate_id(id)?;
        let id_param = scalar_to_sql(serialize(system::ID, id, def.column_type(system::ID)?)?);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM \"{}\" WHERE \"{}\" = ?",
                def.name,
                system::ID
            ))?;
            let names: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|n| (*n).to_string())
                .collect();
            let mut rows = stmt.query([id_param])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_record(row, &names, &def)?)),
                None => Ok(None),
            }
        })
    }

    fn delete_ids(&self, table: &str, ids: &[Value]) -> StoreResult<()> {
        let def = self.definition(table)?;
        let mut stmts = Vec::with_capacity(ids.len());
        for id in ids {
            // Null entries in the id list are ignored.
            if id.is_null() {
                continue;
            }
            stmts.push(Self::delete_statement(&def, id)?);
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (sql, param) in &stmts {
                tx.execute(sql, [param.clone()])?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn delete_matching(&self, query: &Query) -> StoreResult<()> {
        let def = self.definition(&query.table)?;

        // Resolve to ids, ignoring whatever projection the caller supplied.
        let mut id_query = query.clone();
        id_query.select = vec![system::ID.to_string()];
        id_query.include_total_count = false;
        let stmts = translate(&id_query)?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let ids: Vec<rusqlite::types::Value> = {
                let mut stmt = tx.prepare(&stmts[0].sql)?;
                let mut rows = stmt.query(params_from_iter(
                    stmts[0].params.iter().cloned().map(scalar_to_sql),
                ))?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    ids.push(row.get::<_, rusqlite::types::Value>(0)?);
                }
                ids
            };

            let delete_sql =
                format!("DELETE FROM \"{}\" WHERE \"{}\" = ?", def.name, system::ID);
            for id in ids {
                tx.execute(&delete_sql, [id])?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    fn read(&self, query: &Query) -> StoreResult<QueryResult> {
        let def = self.definition(&query.table)?;
        let stmts = translate(query)?;

        self.with_conn(|conn| {
            let mut records = Vec::new();
            {
                let mut stmt = conn.prepare(&stmts[0].sql)?;
                let names: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|n| (*n).to_string())
                    .collect();
                let mut rows = stmt.query(params_from_iter(
                    stmts[0].params.iter().cloned().map(scalar_to_sql),
                ))?;
                while let Some(row) = rows.next()? {
                    records.push(row_to_record(row, &names, &def)?);
                }
            }

            let total_count = match stmts.get(1) {
                Some(count_stmt) => {
                    let count: i64 = conn.query_row(
                        &count_stmt.sql,
                        params_from_iter(
                            count_stmt.params.iter().cloned().map(scalar_to_sql),
                        ),
                        |row| row.get(0),
                    )?;
                    Some(count.max(0) as u64)
                }
                None => None,
            };

            Ok(QueryResult {
                records,
                total_count,
            })
        })
    }

    fn execute_batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        // Serialize every entry up front; a bad entry fails the batch
        // before anything is written.
        let mut stmts = Vec::with_capacity(ops.len());
        for op in &ops {
            match op {
                BatchOp::Upsert { table, record } => {
                    let def = self.definition(table)?;
                    stmts.push(Self::upsert_statement(&def, record)?);
                }
                BatchOp::Delete { table, id } => {
                    let def = self.definition(table)?;
                    let (sql, param) = Self::delete_statement(&def, id)?;
                    stmts.push((sql, vec![param]));
                }
            }
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            Self::apply_batch(&tx, &stmts)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn close(&self) -> StoreResult<()> {
        *self.conn.lock() = None;
        Ok(())
    }
}

fn scalar_to_sql(scalar: SqlScalar) -> rusqlite::types::Value {
    match scalar {
        SqlScalar::Null => rusqlite::types::Value::Null,
        SqlScalar::Integer(i) => rusqlite::types::Value::Integer(i),
        SqlScalar::Real(f) => rusqlite::types::Value::Real(f),
        SqlScalar::Text(s) => rusqlite::types::Value::Text(s),
    }
}

fn sql_to_scalar(value: rusqlite::types::Value) -> StoreResult<SqlScalar> {
    match value {
        rusqlite::types::Value::Null => Ok(SqlScalar::Null),
        rusqlite::types::Value::Integer(i) => Ok(SqlScalar::Integer(i)),
        rusqlite::types::Value::Real(f) => Ok(SqlScalar::Real(f)),
        rusqlite::types::Value::Text(s) => Ok(SqlScalar::Text(s)),
        rusqlite::types::Value::Blob(_) => Err(StoreError::invalid_argument(
            "blob columns are not part of the store's scalar domain",
        )),
    }
}

/// Deserializes one row into a record. Columns holding NULL are omitted,
/// as are columns the registry does not know about.
fn row_to_record(
    row: &rusqlite::Row<'_>,
    names: &[String],
    def: &TableDefinition,
) -> StoreResult<Record> {
    let mut record = Record::new();
    for (index, name) in names.iter().enumerate() {
        let Some(&ty) = def.columns.get(name) else {
            continue;
        };
        let raw: rusqlite::types::Value = row.get(index)?;
        let value = deserialize(name, sql_to_scalar(raw)?, ty)?;
        if !value.is_null() {
            record.insert(name.clone(), value);
        }
    }
    Ok(record)
}
