//! The sync context: local CRUD on synced tables and the pull, push and
//! purge orchestration.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use offsync_codec::{
    id_from_text, id_to_text, instant_from_json, record_from_json, record_id, record_to_json,
    validate_id, ColumnType, Record, Value,
};
use offsync_store::{
    BatchOp, Filter, LocalStore, OrderBy, Query, QueryResult, SortDir, TableDefinition,
};

use crate::config::PullSettings;
use crate::error::{SyncError, SyncResult};
use crate::operation::{OperationAction, PendingOperation};
use crate::oplog::OperationLog;
use crate::push_error::{PushError, PushHandler, ResolutionOutcome};
use crate::transport::TableTransport;
use crate::version::etag_from_version;

use offsync_codec::system;

/// Name of the reserved table holding incremental-pull cursors.
pub const CURSORS_TABLE: &str = "__sync_cursors";

const COL_CURSOR_TABLE: &str = "tableName";
const COL_CURSOR_QUERY: &str = "queryId";
const COL_CURSOR_HIGH_WATER: &str = "highWater";

/// One conflict that the handler left unhandled during a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledConflict {
    /// Table of the conflicting operation.
    pub table: String,
    /// Canonical text form of the record id.
    pub item_id: String,
    /// The pending action that conflicted.
    pub action: OperationAction,
    /// HTTP status of the conflicting response.
    pub status: Option<u16>,
}

/// Outcome of a completed push.
#[derive(Debug, Clone, Default)]
pub struct PushResult {
    /// Operations acknowledged by the server and removed from the log.
    pub pushed: u64,
    /// Conflicts the handler left unhandled; their operations are still
    /// pending.
    pub unhandled_conflicts: Vec<UnhandledConflict>,
}

impl PushResult {
    /// True when every operation was pushed or resolved.
    pub fn is_complete(&self) -> bool {
        self.unhandled_conflicts.is_empty()
    }
}

/// The public surface for CRUD on synced tables, and the pull, push and
/// purge orchestrator.
///
/// A context is bound to a store, a transport and a push handler at
/// construction and must be [`initialize`](SyncContext::initialize)d
/// before use.
///
/// # Ordering
///
/// Local CRUD runs under a single context-wide queue, so the
/// read-before-write checks and the subsequent write are linearizable with
/// respect to each other. Pull and purge serialize per table; push
/// serializes against every pull through the sync queue.
pub struct SyncContext<T: TableTransport> {
    store: Arc<dyn LocalStore>,
    transport: T,
    handler: Arc<dyn PushHandler>,
    oplog: RwLock<Option<Arc<OperationLog>>>,
    crud_queue: Mutex<()>,
    sync_queue: Mutex<()>,
    table_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T: TableTransport> SyncContext<T> {
    /// Creates an uninitialized context.
    pub fn new(store: Arc<dyn LocalStore>, transport: T, handler: Arc<dyn PushHandler>) -> Self {
        Self {
            store,
            transport,
            handler,
            oplog: RwLock::new(None),
            crud_queue: Mutex::new(()),
            sync_queue: Mutex::new(()),
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Binds the context to its store: defines the reserved tables and
    /// recovers operation-log state. Idempotent.
    pub fn initialize(&self) -> SyncResult<()> {
        let mut slot = self.oplog.write();
        if slot.is_some() {
            return Ok(());
        }

        let oplog = OperationLog::open(Arc::clone(&self.store))?;
        self.store.define_table(
            TableDefinition::new(CURSORS_TABLE)
                .with_column(system::ID, ColumnType::String)
                .with_column(COL_CURSOR_TABLE, ColumnType::String)
                .with_column(COL_CURSOR_QUERY, ColumnType::String)
                .with_column(COL_CURSOR_HIGH_WATER, ColumnType::Date),
        )?;

        *slot = Some(Arc::new(oplog));
        info!("sync context initialized");
        Ok(())
    }

    fn ensure_initialized(&self) -> SyncResult<Arc<OperationLog>> {
        self.oplog
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(SyncError::NotInitialized)
    }

    /// The store this context is bound to.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// The transport this context is bound to.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Defines a synced table, augmenting the definition with the system
    /// columns (`createdAt`, `updatedAt`, `version`, `deleted`) so pulled
    /// server records always have a home for them.
    pub fn define_table(&self, mut def: TableDefinition) -> SyncResult<()> {
        self.ensure_initialized()?;
        if def.name.starts_with("__") {
            return Err(SyncError::validation(format!(
                "table name '{}' is reserved",
                def.name
            )));
        }

        def.columns
            .entry(system::CREATED_AT.to_string())
            .or_insert(ColumnType::Date);
        def.columns
            .entry(system::UPDATED_AT.to_string())
            .or_insert(ColumnType::Date);
        def.columns
            .entry(system::VERSION.to_string())
            .or_insert(ColumnType::String);
        def.columns
            .entry(system::DELETED.to_string())
            .or_insert(ColumnType::Boolean);

        self.store.define_table(def)?;
        Ok(())
    }

    /// Inserts a record locally and logs a pending insert.
    ///
    /// The target table must not already contain the id. A record without
    /// an id gets a generated one when the table's id column is a string.
    /// Returns the record as written.
    pub fn insert(&self, table: &str, mut record: Record) -> SyncResult<Record> {
        let oplog = self.ensure_initialized()?;
        let _queued = self.crud_queue.lock();

        let def = self.store.table_definition(table)?;
        let id = match record_id(&record) {
            Some(id) => {
                validate_id(id)?;
                id.clone()
            }
            None if def.id_type() == Some(ColumnType::String) => {
                let generated = Value::from(Uuid::new_v4().to_string());
                record.insert(system::ID.to_string(), generated.clone());
                generated
            }
            None => {
                return Err(SyncError::validation(format!(
                    "record for table '{table}' has no id"
                )))
            }
        };

        if self.store.try_lookup(table, &id)?.is_some() {
            return Err(SyncError::ItemAlreadyExists {
                table: table.to_string(),
                id: id_to_text(&id)?,
            });
        }

        let log_op = oplog.logging_operation(table, &id, OperationAction::Insert)?;
        let mut batch = vec![BatchOp::Upsert {
            table: table.to_string(),
            record: record.clone(),
        }];
        batch.extend(log_op);
        self.store.execute_batch(batch)?;
        Ok(record)
    }

    /// Updates a record locally and logs a pending update.
    ///
    /// The target table must contain the id.
    pub fn update(&self, table: &str, record: Record) -> SyncResult<()> {
        let oplog = self.ensure_initialized()?;
        let _queued = self.crud_queue.lock();

        self.store.table_definition(table)?;
        let id = record_id(&record)
            .ok_or_else(|| {
                SyncError::validation(format!("record for table '{table}' has no id"))
            })?
            .clone();
        validate_id(&id)?;

        if self.store.try_lookup(table, &id)?.is_none() {
            return Err(SyncError::ItemNotFound {
                table: table.to_string(),
                id: id_to_text(&id)?,
            });
        }

        let log_op = oplog.logging_operation(table, &id, OperationAction::Update)?;
        let mut batch = vec![BatchOp::Upsert {
            table: table.to_string(),
            record,
        }];
        batch.extend(log_op);
        self.store.execute_batch(batch)?;
        Ok(())
    }

    /// Deletes a record locally and logs a pending delete.
    pub fn delete(&self, table: &str, id: &Value) -> SyncResult<()> {
        let oplog = self.ensure_initialized()?;
        let _queued = self.crud_queue.lock();

        self.store.table_definition(table)?;
        validate_id(id)?;

        let log_op = oplog.logging_operation(table, id, OperationAction::Delete)?;
        let mut batch = vec![BatchOp::Delete {
            table: table.to_string(),
            id: id.clone(),
        }];
        batch.extend(log_op);
        self.store.execute_batch(batch)?;
        Ok(())
    }

    /// Returns the local record with the given id, failing when absent.
    pub fn lookup(&self, table: &str, id: &Value) -> SyncResult<Record> {
        self.ensure_initialized()?;
        let _queued = self.crud_queue.lock();
        Ok(self.store.lookup(table, id)?)
    }

    /// Returns the local record with the given id, or `None`.
    pub fn try_lookup(&self, table: &str, id: &Value) -> SyncResult<Option<Record>> {
        self.ensure_initialized()?;
        let _queued = self.crud_queue.lock();
        Ok(self.store.try_lookup(table, id)?)
    }

    /// Executes a query against the local data.
    pub fn read(&self, query: &Query) -> SyncResult<QueryResult> {
        self.ensure_initialized()?;
        Ok(self.store.read(query)?)
    }

    /// The stored incremental cursor for `(table, query_id)`, when one
    /// exists.
    pub fn cursor(&self, table: &str, query_id: &str) -> SyncResult<Option<DateTime<Utc>>> {
        self.ensure_initialized()?;
        let key = Value::from(cursor_key(table, query_id));
        Ok(self
            .store
            .try_lookup(CURSORS_TABLE, &key)?
            .and_then(|record| {
                record
                    .get(COL_CURSOR_HIGH_WATER)
                    .and_then(Value::as_date)
            }))
    }

    /// Pulls server records into the local table.
    ///
    /// With a `query_id` the pull is incremental: only records with
    /// `updatedAt` beyond the stored cursor are requested, ordering is
    /// forced to `updatedAt` ascending, and the cursor advances with every
    /// integrated page. Pending operations for the table are pushed first;
    /// the pull fails if any remain afterwards.
    ///
    /// Records the server reports as deleted are removed locally, all
    /// others are upserted. Pull never writes operation-log entries.
    /// Returns the number of integrated records.
    pub fn pull(
        &self,
        query: &Query,
        query_id: Option<&str>,
        settings: &PullSettings,
    ) -> SyncResult<u64> {
        let oplog = self.ensure_initialized()?;

        if query.top.is_some() || query.skip.is_some() {
            return Err(SyncError::validation(
                "pull queries must not use top or skip; paging is driven by the pull",
            ));
        }
        if settings.page_size == 0 {
            return Err(SyncError::validation("pull page size must be positive"));
        }
        if let Some(query_id) = query_id {
            if query_id.is_empty() || query_id.contains('|') {
                return Err(SyncError::validation(
                    "query ids must be non-empty and must not contain '|'",
                ));
            }
        }
        let def = self.store.table_definition(&query.table)?;

        let table_lock = self.table_lock(&query.table);
        let _single_flight = table_lock.lock();

        // Unpushed local changes would be overwritten by server truth.
        if oplog.pending_count(&query.table)? > 0 {
            debug!(table = %query.table, "pending operations; pushing before pull");
            self.push_with_queue(&oplog)?;
            if oplog.pending_count(&query.table)? > 0 {
                return Err(SyncError::PendingOperations {
                    table: query.table.clone(),
                });
            }
        }

        let incremental = query_id.is_some();
        let mut cursor = match query_id {
            Some(query_id) => self
                .cursor(&query.table, query_id)?
                .unwrap_or(DateTime::UNIX_EPOCH),
            None => DateTime::UNIX_EPOCH,
        };
        let mut skip: u64 = 0;
        let mut integrated: u64 = 0;

        loop {
            let mut page_query = Query::new(&query.table);
            page_query.filter = if incremental {
                let horizon = Filter::gt(system::UPDATED_AT, cursor);
                Some(match &query.filter {
                    Some(filter) => filter.clone().and(horizon),
                    None => horizon,
                })
            } else {
                query.filter.clone()
            };
            page_query.order_by = if incremental {
                vec![OrderBy {
                    column: system::UPDATED_AT.to_string(),
                    dir: SortDir::Asc,
                }]
            } else {
                query.order_by.clone()
            };
            page_query.top = Some(settings.page_size);
            if skip > 0 {
                page_query.skip = Some(skip);
            }

            let page = self
                .transport
                .read(&query.table, &page_query)
                .map_err(SyncError::Transport)?;
            let count = page.records.len() as u64;

            let mut batch = Vec::with_capacity(page.records.len() + 1);
            let mut max_updated: Option<DateTime<Utc>> = None;
            for wire in &page.records {
                let record = record_from_json(wire, &def.columns)?;
                let id = record_id(&record).cloned().ok_or_else(|| {
                    SyncError::validation(format!(
                        "server record for table '{}' has no id",
                        query.table
                    ))
                })?;
                validate_id(&id)?;

                if let Some(updated) = wire.get(system::UPDATED_AT).and_then(instant_from_json) {
                    max_updated = Some(max_updated.map_or(updated, |m| m.max(updated)));
                }

                let deleted = wire
                    .get(system::DELETED)
                    .and_then(Json::as_bool)
                    .unwrap_or(false);
                if deleted {
                    batch.push(BatchOp::Delete {
                        table: query.table.clone(),
                        id,
                    });
                } else {
                    batch.push(BatchOp::Upsert {
                        table: query.table.clone(),
                        record,
                    });
                }
            }

            // The cursor advances in the same batch as the page it covers,
            // so a failure never moves it past an unintegrated page.
            let mut advanced = false;
            if let (Some(query_id), Some(high_water)) = (query_id, max_updated) {
                if high_water > cursor {
                    batch.push(BatchOp::Upsert {
                        table: CURSORS_TABLE.to_string(),
                        record: cursor_record(&query.table, query_id, high_water),
                    });
                    cursor = high_water;
                    advanced = true;
                }
            }

            if !batch.is_empty() {
                self.store.execute_batch(batch)?;
            }
            integrated += count;
            debug!(table = %query.table, count, "pull page integrated");

            if count < settings.page_size {
                break;
            }
            if incremental {
                // A page of equal timestamps cannot move the cursor; fall
                // back to skip paging so the pull terminates.
                if advanced {
                    skip = 0;
                } else {
                    skip += count;
                }
            } else {
                skip += count;
            }
        }

        info!(table = %query.table, integrated, "pull complete");
        Ok(integrated)
    }

    /// Replays the operation log against the server, in sequence order.
    ///
    /// Conflicts and errors are routed to the push handler; see
    /// [`PushError`] for the resolution contract. Unhandled conflicts are
    /// collected into the result, an unhandled error aborts the push.
    pub fn push(&self) -> SyncResult<PushResult> {
        let oplog = self.ensure_initialized()?;
        self.push_with_queue(&oplog)
    }

    fn push_with_queue(&self, oplog: &Arc<OperationLog>) -> SyncResult<PushResult> {
        let _queued = self.sync_queue.lock();
        self.push_inner(oplog)
    }

    fn push_inner(&self, oplog: &Arc<OperationLog>) -> SyncResult<PushResult> {
        let mut result = PushResult::default();
        let mut after_sequence = 0i64;

        'operations: loop {
            let Some(op) = oplog.first_pending_after(after_sequence)? else {
                break;
            };
            oplog.lock(&op)?;
            let mut current = op;

            'attempt: loop {
                let failure = match self.execute_op(&current) {
                    Ok(()) => {
                        oplog.resolve_remove(Vec::new())?;
                        result.pushed += 1;
                        debug!(
                            table = %current.table,
                            id = %current.item_id,
                            action = current.action.as_str(),
                            "operation pushed"
                        );
                        continue 'operations;
                    }
                    Err(SyncError::Transport(error)) => error,
                    Err(other) => {
                        oplog.unlock()?;
                        return Err(other);
                    }
                };

                let conflict = failure.is_conflict();
                let mut push_error = self.build_push_error(oplog, &current, failure)?;

                let handled_by = if conflict {
                    self.handler.on_conflict(&mut push_error)
                } else {
                    self.handler.on_error(&mut push_error)
                };
                if let Err(handler_error) = handled_by {
                    oplog.unlock()?;
                    return Err(handler_error);
                }

                match (push_error.is_handled(), push_error.outcome()) {
                    (true, Some(ResolutionOutcome::Proceed)) => {
                        after_sequence = current.sequence;
                        continue 'operations;
                    }
                    (true, Some(ResolutionOutcome::Retry)) => {
                        current = oplog
                            .locked_op()
                            .ok_or_else(|| SyncError::internal("retry without a locked op"))?;
                        continue 'attempt;
                    }
                    (true, None) => {
                        // Handled without a verb: skip the op, keep it
                        // pending.
                        oplog.unlock()?;
                        after_sequence = current.sequence;
                        continue 'operations;
                    }
                    (false, _) => {
                        if push_error.op_removed() {
                            after_sequence = current.sequence;
                            continue 'operations;
                        }
                        oplog.unlock()?;
                        if conflict {
                            warn!(
                                table = %current.table,
                                id = %current.item_id,
                                "unhandled push conflict"
                            );
                            result.unhandled_conflicts.push(UnhandledConflict {
                                table: current.table.clone(),
                                item_id: current.item_id.clone(),
                                action: current.action,
                                status: push_error.status(),
                            });
                            after_sequence = current.sequence;
                            continue 'operations;
                        }
                        return Err(push_error.into_error());
                    }
                }
            }
        }

        info!(pushed = result.pushed, unhandled = result.unhandled_conflicts.len(), "push complete");
        Ok(result)
    }

    /// Issues the remote call for one operation.
    fn execute_op(&self, op: &PendingOperation) -> SyncResult<()> {
        let def = self.store.table_definition(&op.table)?;
        let id_type = def
            .id_type()
            .ok_or_else(|| SyncError::internal("table without id column"))?;
        let id = id_from_text(&op.item_id, id_type)?;

        match op.action {
            OperationAction::Insert | OperationAction::Update => {
                let record = self.store.try_lookup(&op.table, &id)?.ok_or_else(|| {
                    SyncError::internal(format!(
                        "pending {} references missing record '{}' in table '{}'",
                        op.action.as_str(),
                        op.item_id,
                        op.table
                    ))
                })?;
                let body = push_body(&record);
                if op.action == OperationAction::Insert {
                    self.transport
                        .insert(&op.table, &body)
                        .map_err(SyncError::Transport)?;
                } else {
                    let if_match = record
                        .get(system::VERSION)
                        .and_then(Value::as_str)
                        .map(etag_from_version);
                    self.transport
                        .update(&op.table, &op.item_id, &body, if_match.as_deref())
                        .map_err(SyncError::Transport)?;
                }
            }
            OperationAction::Delete => {
                // The local row is usually a tombstone by now; send its
                // version only when it still exists.
                let if_match = self
                    .store
                    .try_lookup(&op.table, &id)?
                    .and_then(|record| {
                        record
                            .get(system::VERSION)
                            .and_then(Value::as_str)
                            .map(etag_from_version)
                    });
                self.transport
                    .delete(&op.table, &op.item_id, if_match.as_deref())
                    .map_err(SyncError::Transport)?;
            }
        }
        Ok(())
    }

    fn build_push_error(
        &self,
        oplog: &Arc<OperationLog>,
        op: &PendingOperation,
        error: crate::transport::TransportError,
    ) -> SyncResult<PushError> {
        let def = self.store.table_definition(&op.table)?;
        let id_type = def
            .id_type()
            .ok_or_else(|| SyncError::internal("table without id column"))?;
        let id = id_from_text(&op.item_id, id_type)?;

        let client_record = self.store.try_lookup(&op.table, &id)?;
        let server_record = error
            .server_body()
            .and_then(|body| record_from_json(body, &def.columns).ok());

        Ok(PushError::new(
            op.table.clone(),
            id,
            op.action,
            client_record,
            server_record,
            error,
            Arc::clone(oplog),
        ))
    }

    /// Deletes local records matching the query.
    ///
    /// A purge with pending operations for the table fails unless `force`
    /// is set, in which case the pending operations are dropped too. A
    /// whole-table purge also drops the table's incremental cursors. The
    /// whole purge is one store transaction.
    pub fn purge(&self, query: &Query, force: bool) -> SyncResult<()> {
        let oplog = self.ensure_initialized()?;
        self.store.table_definition(&query.table)?;

        let table_lock = self.table_lock(&query.table);
        let _single_flight = table_lock.lock();

        if !force && oplog.pending_count(&query.table)? > 0 {
            return Err(SyncError::PendingOperations {
                table: query.table.clone(),
            });
        }

        let mut batch = Vec::new();

        // Resolve the rows to purge, ignoring any caller projection.
        let mut id_query = query.clone();
        id_query.select = vec![system::ID.to_string()];
        id_query.include_total_count = false;
        for record in self.store.read(&id_query)?.records {
            if let Some(id) = record_id(&record) {
                batch.push(BatchOp::Delete {
                    table: query.table.clone(),
                    id: id.clone(),
                });
            }
        }

        if force {
            batch.extend(oplog.purge_batch(&query.table)?);
        }

        if query.is_whole_table() {
            let cursors = self.store.read(
                &Query::new(CURSORS_TABLE)
                    .with_filter(Filter::eq(COL_CURSOR_TABLE, query.table.as_str()))
                    .select(&[system::ID]),
            )?;
            for record in cursors.records {
                if let Some(id) = record_id(&record) {
                    batch.push(BatchOp::Delete {
                        table: CURSORS_TABLE.to_string(),
                        id: id.clone(),
                    });
                }
            }
        }

        if !batch.is_empty() {
            self.store.execute_batch(batch)?;
        }
        info!(table = %query.table, force, "purge complete");
        Ok(())
    }

    fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock();
        Arc::clone(
            locks
                .entry(table.to_ascii_lowercase())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

fn cursor_key(table: &str, query_id: &str) -> String {
    format!("{table}|{query_id}")
}

fn cursor_record(table: &str, query_id: &str, high_water: DateTime<Utc>) -> Record {
    let mut record = Record::new();
    record.insert(system::ID.to_string(), Value::from(cursor_key(table, query_id)));
    record.insert(COL_CURSOR_TABLE.to_string(), Value::from(table));
    record.insert(COL_CURSOR_QUERY.to_string(), Value::from(query_id));
    record.insert(COL_CURSOR_HIGH_WATER.to_string(), Value::Date(high_water));
    record
}

/// The wire body for a push: the record without its system columns. The
/// version travels in `If-Match`, the rest is server-owned.
fn push_body(record: &Record) -> Json {
    let mut body = record.clone();
    body.remove(system::CREATED_AT);
    body.remove(system::UPDATED_AT);
    body.remove(system::VERSION);
    body.remove(system::DELETED);
    record_to_json(&body)
}
