//! The persistent operation log.
//!
//! Pending local mutations live in a reserved table of the same store as
//! the data they describe, so a log entry and its data mutation always
//! commit together. The log hands the caller the single batch entry that
//! realises the coalescing algebra; the caller appends it to the batch
//! carrying the data mutation.
//!
//! # Invariants
//!
//! - At most one entry per `(table, id)` pair.
//! - Sequence numbers strictly increase and fix push order.
//! - Log and data mutations are always co-transactional.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use offsync_codec::{id_to_text, system, ColumnType, Record, Value};
use offsync_store::{BatchOp, Filter, LocalStore, Query, SortDir, TableDefinition};
use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::operation::{coalesce, Coalesce, CoalesceError, OperationAction, PendingOperation};

/// Name of the reserved table holding operation-log entries.
pub const OPERATIONS_TABLE: &str = "__operations";

const COL_TABLE: &str = "tableName";
const COL_ITEM: &str = "itemId";
const COL_ACTION: &str = "action";
const COL_STATE: &str = "state";

const STATE_PENDING: &str = "pending";
const STATE_LOCKED: &str = "locked";

/// The persistent, ordered log of pending local mutations.
pub struct OperationLog {
    store: Arc<dyn LocalStore>,
    next_sequence: AtomicI64,
    /// The single operation currently locked by push, if any.
    locked: Mutex<Option<PendingOperation>>,
}

impl OperationLog {
    /// Opens the log over a store: defines the reserved table, recovers a
    /// stale lock left by a crashed push, and seeds the sequence counter.
    pub fn open(store: Arc<dyn LocalStore>) -> SyncResult<Self> {
        store.define_table(Self::definition())?;

        // A crashed push leaves its op locked; nothing is in flight now.
        let stale = store
            .read(
                &Query::new(OPERATIONS_TABLE)
                    .with_filter(Filter::eq(COL_STATE, STATE_LOCKED)),
            )?
            .records
            .into_iter()
            .map(|mut record| {
                record.insert(COL_STATE.to_string(), Value::from(STATE_PENDING));
                record
            })
            .collect::<Vec<_>>();
        if !stale.is_empty() {
            store.upsert(OPERATIONS_TABLE, stale)?;
        }

        let last = store
            .read(
                &Query::new(OPERATIONS_TABLE)
                    .order_by(system::ID, SortDir::Desc)
                    .top(1),
            )?
            .records
            .first()
            .and_then(|record| record.get(system::ID))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        Ok(Self {
            store,
            next_sequence: AtomicI64::new(last + 1),
            locked: Mutex::new(None),
        })
    }

    fn definition() -> TableDefinition {
        TableDefinition::new(OPERATIONS_TABLE)
            .with_column(system::ID, ColumnType::Integer)
            .with_column(COL_TABLE, ColumnType::String)
            .with_column(COL_ITEM, ColumnType::String)
            .with_column(COL_ACTION, ColumnType::String)
            .with_column(COL_STATE, ColumnType::String)
    }

    fn entry_record(
        sequence: i64,
        table: &str,
        item_id: &str,
        action: OperationAction,
        state: &str,
    ) -> Record {
        let mut record = Record::new();
        record.insert(system::ID.to_string(), Value::Integer(sequence));
        record.insert(COL_TABLE.to_string(), Value::from(table));
        record.insert(COL_ITEM.to_string(), Value::from(item_id));
        record.insert(COL_ACTION.to_string(), Value::from(action.as_str()));
        record.insert(COL_STATE.to_string(), Value::from(state));
        record
    }

    fn parse_entry(record: &Record) -> SyncResult<(PendingOperation, String)> {
        let sequence = record
            .get(system::ID)
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::internal("operation entry without sequence"))?;
        let table = record
            .get(COL_TABLE)
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::internal("operation entry without table name"))?
            .to_string();
        let item_id = record
            .get(COL_ITEM)
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::internal("operation entry without item id"))?
            .to_string();
        let action = record
            .get(COL_ACTION)
            .and_then(Value::as_str)
            .and_then(OperationAction::parse)
            .ok_or_else(|| SyncError::internal("operation entry with unknown action"))?;
        let state = record
            .get(COL_STATE)
            .and_then(Value::as_str)
            .unwrap_or(STATE_PENDING)
            .to_string();

        Ok((
            PendingOperation {
                sequence,
                table,
                item_id,
                action,
            },
            state,
        ))
    }

    /// The stored entry for `(table, id)`, with its state.
    fn find(&self, table: &str, item_id: &str) -> SyncResult<Option<(PendingOperation, String)>> {
        let result = self.store.read(
            &Query::new(OPERATIONS_TABLE)
                .with_filter(Filter::eq(COL_TABLE, table).and(Filter::eq(COL_ITEM, item_id)))
                .top(1),
        )?;
        match result.records.first() {
            Some(record) => Ok(Some(Self::parse_entry(record)?)),
            None => Ok(None),
        }
    }

    /// Returns the batch entry that persists the correct log mutation for a
    /// new local change, honoring the coalescing algebra. `None` means the
    /// existing entry already covers the change.
    ///
    /// The caller appends the entry to the same batch as the data mutation
    /// so both commit atomically.
    pub fn logging_operation(
        &self,
        table: &str,
        id: &Value,
        action: OperationAction,
    ) -> SyncResult<Option<BatchOp>> {
        let item_id = id_to_text(id)?;
        let existing = self.find(table, &item_id)?;

        if let Some((op, state)) = &existing {
            if state == STATE_LOCKED {
                return Err(SyncError::OperationLocked {
                    table: op.table.clone(),
                    id: op.item_id.clone(),
                });
            }
        }

        let existing_op = existing.map(|(op, _)| op);
        match coalesce(existing_op.as_ref().map(|op| op.action), action) {
            Ok(Coalesce::Append) => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                Ok(Some(BatchOp::Upsert {
                    table: OPERATIONS_TABLE.to_string(),
                    record: Self::entry_record(sequence, table, &item_id, action, STATE_PENDING),
                }))
            }
            Ok(Coalesce::Keep) => Ok(None),
            Ok(Coalesce::Replace(new_action)) => {
                let op = existing_op
                    .ok_or_else(|| SyncError::internal("replace without existing entry"))?;
                Ok(Some(BatchOp::Upsert {
                    table: OPERATIONS_TABLE.to_string(),
                    record: Self::entry_record(
                        op.sequence,
                        table,
                        &item_id,
                        new_action,
                        STATE_PENDING,
                    ),
                }))
            }
            Ok(Coalesce::Cancel) => {
                let op = existing_op
                    .ok_or_else(|| SyncError::internal("cancel without existing entry"))?;
                Ok(Some(BatchOp::Delete {
                    table: OPERATIONS_TABLE.to_string(),
                    id: Value::Integer(op.sequence),
                }))
            }
            Err(CoalesceError::IdExists) => Err(SyncError::ItemAlreadyExists {
                table: table.to_string(),
                id: item_id,
            }),
            Err(CoalesceError::NotFound) => Err(SyncError::ItemNotFound {
                table: table.to_string(),
                id: item_id,
            }),
        }
    }

    /// The earliest pending operation with a sequence above `sequence`.
    pub fn first_pending_after(&self, sequence: i64) -> SyncResult<Option<PendingOperation>> {
        let result = self.store.read(
            &Query::new(OPERATIONS_TABLE)
                .with_filter(
                    Filter::gt(system::ID, sequence).and(Filter::eq(COL_STATE, STATE_PENDING)),
                )
                .order_by(system::ID, SortDir::Asc)
                .top(1),
        )?;
        match result.records.first() {
            Some(record) => Ok(Some(Self::parse_entry(record)?.0)),
            None => Ok(None),
        }
    }

    /// Number of log entries for a table.
    pub fn pending_count(&self, table: &str) -> SyncResult<u64> {
        let result = self.store.read(
            &Query::new(OPERATIONS_TABLE)
                .with_filter(Filter::eq(COL_TABLE, table))
                .top(0)
                .with_total_count(),
        )?;
        Ok(result.total_count.unwrap_or(0))
    }

    /// Total number of log entries.
    pub fn len(&self) -> SyncResult<u64> {
        let result = self.store.read(
            &Query::new(OPERATIONS_TABLE).top(0).with_total_count(),
        )?;
        Ok(result.total_count.unwrap_or(0))
    }

    /// True when the log holds no entries.
    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Takes the advisory lock on one operation. Push holds it for the
    /// duration of the op's remote call and resolution.
    pub fn lock(&self, op: &PendingOperation) -> SyncResult<()> {
        let mut locked = self.locked.lock();
        if locked.is_some() {
            return Err(SyncError::internal("an operation is already locked"));
        }
        self.store.upsert(
            OPERATIONS_TABLE,
            vec![Self::entry_record(
                op.sequence,
                &op.table,
                &op.item_id,
                op.action,
                STATE_LOCKED,
            )],
        )?;
        *locked = Some(op.clone());
        Ok(())
    }

    /// Releases the advisory lock, leaving the operation pending. A no-op
    /// when nothing is locked.
    pub fn unlock(&self) -> SyncResult<()> {
        let mut locked = self.locked.lock();
        if let Some(op) = locked.take() {
            self.store.upsert(
                OPERATIONS_TABLE,
                vec![Self::entry_record(
                    op.sequence,
                    &op.table,
                    &op.item_id,
                    op.action,
                    STATE_PENDING,
                )],
            )?;
        }
        Ok(())
    }

    /// The operation currently locked, if any.
    pub fn locked_op(&self) -> Option<PendingOperation> {
        self.locked.lock().clone()
    }

    /// Removes the locked operation, applying `extra` data mutations in the
    /// same transaction.
    pub fn resolve_remove(&self, extra: Vec<BatchOp>) -> SyncResult<()> {
        let mut locked = self.locked.lock();
        let op = locked
            .clone()
            .ok_or_else(|| SyncError::resolution("no operation is locked"))?;

        let mut ops = extra;
        ops.push(BatchOp::Delete {
            table: OPERATIONS_TABLE.to_string(),
            id: Value::Integer(op.sequence),
        });
        self.store.execute_batch(ops)?;
        *locked = None;
        Ok(())
    }

    /// Applies data mutations while keeping the locked operation pending
    /// for a retry.
    pub fn resolve_keep(&self, extra: Vec<BatchOp>) -> SyncResult<()> {
        if self.locked.lock().is_none() {
            return Err(SyncError::resolution("no operation is locked"));
        }
        self.store.execute_batch(extra)?;
        Ok(())
    }

    /// Rewrites the locked operation's action (same sequence), applying
    /// `extra` data mutations in the same transaction. The operation stays
    /// locked for the retry.
    pub fn resolve_replace_action(
        &self,
        action: OperationAction,
        extra: Vec<BatchOp>,
    ) -> SyncResult<()> {
        let mut locked = self.locked.lock();
        let op = locked
            .clone()
            .ok_or_else(|| SyncError::resolution("no operation is locked"))?;

        let mut ops = extra;
        ops.push(BatchOp::Upsert {
            table: OPERATIONS_TABLE.to_string(),
            record: Self::entry_record(op.sequence, &op.table, &op.item_id, action, STATE_LOCKED),
        });
        self.store.execute_batch(ops)?;
        if let Some(op) = locked.as_mut() {
            op.action = action;
        }
        Ok(())
    }

    /// Batch entries removing every log entry of a table, for force purge.
    pub fn purge_batch(&self, table: &str) -> SyncResult<Vec<BatchOp>> {
        let result = self.store.read(
            &Query::new(OPERATIONS_TABLE)
                .with_filter(Filter::eq(COL_TABLE, table))
                .select(&[system::ID]),
        )?;
        Ok(result
            .records
            .iter()
            .filter_map(|record| record.get(system::ID))
            .map(|sequence| BatchOp::Delete {
                table: OPERATIONS_TABLE.to_string(),
                id: sequence.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_store::SqliteStore;

    fn open_log() -> (Arc<dyn LocalStore>, OperationLog) {
        let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let log = OperationLog::open(Arc::clone(&store)).unwrap();
        (store, log)
    }

    fn apply(store: &Arc<dyn LocalStore>, op: Option<BatchOp>) {
        if let Some(op) = op {
            store.execute_batch(vec![op]).unwrap();
        }
    }

    #[test]
    fn append_assigns_increasing_sequences() {
        let (store, log) = open_log();

        let a = log
            .logging_operation("t", &Value::from("a"), OperationAction::Insert)
            .unwrap();
        apply(&store, a);
        let b = log
            .logging_operation("t", &Value::from("b"), OperationAction::Insert)
            .unwrap();
        apply(&store, b);

        let first = log.first_pending_after(0).unwrap().unwrap();
        let second = log.first_pending_after(first.sequence).unwrap().unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(first.item_id, "a");
        assert_eq!(second.item_id, "b");
        assert_eq!(log.pending_count("t").unwrap(), 2);
    }

    #[test]
    fn insert_then_update_keeps_insert() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );

        let op = log
            .logging_operation("t", &Value::from("a"), OperationAction::Update)
            .unwrap();
        assert!(op.is_none());

        let pending = log.first_pending_after(0).unwrap().unwrap();
        assert_eq!(pending.action, OperationAction::Insert);
    }

    #[test]
    fn insert_then_delete_cancels() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Delete)
                .unwrap(),
        );

        assert_eq!(log.pending_count("t").unwrap(), 0);
        assert!(log.first_pending_after(0).unwrap().is_none());
    }

    #[test]
    fn update_then_delete_replaces_keeping_sequence() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Update)
                .unwrap(),
        );
        let sequence = log.first_pending_after(0).unwrap().unwrap().sequence;

        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Delete)
                .unwrap(),
        );

        let pending = log.first_pending_after(0).unwrap().unwrap();
        assert_eq!(pending.action, OperationAction::Delete);
        assert_eq!(pending.sequence, sequence);
        assert_eq!(log.pending_count("t").unwrap(), 1);
    }

    #[test]
    fn delete_then_insert_becomes_update() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Delete)
                .unwrap(),
        );
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );

        let pending = log.first_pending_after(0).unwrap().unwrap();
        assert_eq!(pending.action, OperationAction::Update);
    }

    #[test]
    fn invalid_cells_error() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );
        assert!(matches!(
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert),
            Err(SyncError::ItemAlreadyExists { .. })
        ));

        apply(
            &store,
            log.logging_operation("t", &Value::from("b"), OperationAction::Delete)
                .unwrap(),
        );
        assert!(matches!(
            log.logging_operation("t", &Value::from("b"), OperationAction::Update),
            Err(SyncError::ItemNotFound { .. })
        ));
    }

    #[test]
    fn ids_coalesce_case_insensitively() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("Item"), OperationAction::Insert)
                .unwrap(),
        );
        apply(
            &store,
            log.logging_operation("t", &Value::from("ITEM"), OperationAction::Delete)
                .unwrap(),
        );
        assert_eq!(log.pending_count("t").unwrap(), 0);
    }

    #[test]
    fn locked_op_rejects_coalescing() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );
        let op = log.first_pending_after(0).unwrap().unwrap();
        log.lock(&op).unwrap();

        assert!(matches!(
            log.logging_operation("t", &Value::from("a"), OperationAction::Delete),
            Err(SyncError::OperationLocked { .. })
        ));

        log.unlock().unwrap();
        assert!(log
            .logging_operation("t", &Value::from("a"), OperationAction::Delete)
            .unwrap()
            .is_some());
    }

    #[test]
    fn locked_op_is_invisible_to_peek() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );
        let op = log.first_pending_after(0).unwrap().unwrap();
        log.lock(&op).unwrap();
        assert!(log.first_pending_after(0).unwrap().is_none());
        log.unlock().unwrap();
        assert!(log.first_pending_after(0).unwrap().is_some());
    }

    #[test]
    fn resolve_remove_is_transactional_with_extras() {
        let (store, log) = open_log();
        store
            .define_table(
                TableDefinition::new("t")
                    .with_column(system::ID, ColumnType::String)
                    .with_column("v", ColumnType::Integer),
            )
            .unwrap();

        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Update)
                .unwrap(),
        );
        let op = log.first_pending_after(0).unwrap().unwrap();
        log.lock(&op).unwrap();

        let mut record = Record::new();
        record.insert(system::ID.to_string(), Value::from("a"));
        record.insert("v".to_string(), Value::Integer(9));
        log.resolve_remove(vec![BatchOp::Upsert {
            table: "t".to_string(),
            record,
        }])
        .unwrap();

        assert!(log.is_empty().unwrap());
        assert!(log.locked_op().is_none());
        let row = store.lookup("t", &Value::from("a")).unwrap();
        assert_eq!(row.get("v"), Some(&Value::Integer(9)));
    }

    #[test]
    fn replace_action_keeps_lock_and_sequence() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );
        let op = log.first_pending_after(0).unwrap().unwrap();
        log.lock(&op).unwrap();

        log.resolve_replace_action(OperationAction::Update, Vec::new())
            .unwrap();
        let locked = log.locked_op().unwrap();
        assert_eq!(locked.action, OperationAction::Update);
        assert_eq!(locked.sequence, op.sequence);

        // Still locked, so still invisible.
        assert!(log.first_pending_after(0).unwrap().is_none());
    }

    #[test]
    fn reopen_recovers_stale_lock() {
        let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        {
            let log = OperationLog::open(Arc::clone(&store)).unwrap();
            apply(
                &store,
                log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                    .unwrap(),
            );
            let op = log.first_pending_after(0).unwrap().unwrap();
            log.lock(&op).unwrap();
            // Simulated crash: the log goes away while the op is locked.
        }

        let log = OperationLog::open(Arc::clone(&store)).unwrap();
        let recovered = log.first_pending_after(0).unwrap().unwrap();
        assert_eq!(recovered.item_id, "a");

        // Sequences continue past the recovered entry.
        let next = log
            .logging_operation("t", &Value::from("b"), OperationAction::Insert)
            .unwrap();
        apply(&store, next);
        let second = log.first_pending_after(recovered.sequence).unwrap().unwrap();
        assert!(second.sequence > recovered.sequence);
    }

    #[test]
    fn purge_batch_removes_only_that_table() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::from("a"), OperationAction::Insert)
                .unwrap(),
        );
        apply(
            &store,
            log.logging_operation("u", &Value::from("b"), OperationAction::Insert)
                .unwrap(),
        );

        let batch = log.purge_batch("t").unwrap();
        store.execute_batch(batch).unwrap();

        assert_eq!(log.pending_count("t").unwrap(), 0);
        assert_eq!(log.pending_count("u").unwrap(), 1);
    }

    #[test]
    fn integer_ids_use_canonical_text() {
        let (store, log) = open_log();
        apply(
            &store,
            log.logging_operation("t", &Value::Integer(42), OperationAction::Insert)
                .unwrap(),
        );
        let op = log.first_pending_after(0).unwrap().unwrap();
        assert_eq!(op.item_id, "42");
    }
}
