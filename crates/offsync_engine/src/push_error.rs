//! The per-operation push error controller.
//!
//! When a push step fails, the failing operation is wrapped in a
//! [`PushError`] and handed to the registered [`PushHandler`]. The handler
//! inspects the failure and resolves it with exactly one verb; each verb is
//! a single transactional action against the store and the operation log.

use std::sync::Arc;

use offsync_codec::{id_to_text, record_id, Record, Value};
use offsync_store::BatchOp;

use crate::error::{SyncError, SyncResult};
use crate::operation::OperationAction;
use crate::oplog::OperationLog;
use crate::transport::TransportError;

/// User hooks invoked by push when an operation fails.
///
/// The default implementations leave the failure unhandled: an unhandled
/// conflict is collected into the push result, an unhandled error aborts
/// the push.
pub trait PushHandler: Send + Sync {
    /// Called for version conflicts (HTTP 412, and 409 insert collisions).
    fn on_conflict(&self, error: &mut PushError) -> SyncResult<()> {
        let _ = error;
        Ok(())
    }

    /// Called for any other failing remote call.
    fn on_error(&self, error: &mut PushError) -> SyncResult<()> {
        let _ = error;
        Ok(())
    }
}

/// A handler that leaves every failure unhandled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPushHandler;

impl PushHandler for DefaultPushHandler {}

/// What push does with the operation after its failure was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolutionOutcome {
    /// The operation is gone; move to the next one.
    Proceed,
    /// The operation is still pending; retry it now.
    Retry,
}

/// One failed push step, with the resolution verbs.
///
/// At most one verb may run per error; a second call fails. Calling any
/// verb marks the error handled; [`PushError::set_handled`] can lower the
/// flag afterwards to skip the retry without removing the operation.
pub struct PushError {
    table: String,
    item_id: Value,
    action: OperationAction,
    client_record: Option<Record>,
    server_record: Option<Record>,
    error: TransportError,
    handled: bool,
    outcome: Option<ResolutionOutcome>,
    op_removed: bool,
    oplog: Arc<OperationLog>,
}

impl PushError {
    pub(crate) fn new(
        table: String,
        item_id: Value,
        action: OperationAction,
        client_record: Option<Record>,
        server_record: Option<Record>,
        error: TransportError,
        oplog: Arc<OperationLog>,
    ) -> Self {
        Self {
            table,
            item_id,
            action,
            client_record,
            server_record,
            error,
            handled: false,
            outcome: None,
            op_removed: false,
            oplog,
        }
    }

    /// The table the failing operation targets.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The id of the failing record.
    pub fn item_id(&self) -> &Value {
        &self.item_id
    }

    /// The pending action that failed.
    pub fn action(&self) -> OperationAction {
        self.action
    }

    /// The HTTP status of the failure, when the server answered.
    pub fn status(&self) -> Option<u16> {
        self.error.status()
    }

    /// True when the failure is a version conflict.
    pub fn is_conflict(&self) -> bool {
        self.error.is_conflict()
    }

    /// The local record the operation was pushing, when one exists.
    pub fn client_record(&self) -> Option<&Record> {
        self.client_record.as_ref()
    }

    /// The server's copy of the record, when the response carried one.
    ///
    /// Present on 412 responses; may be absent on 409 insert collisions.
    pub fn server_record(&self) -> Option<&Record> {
        self.server_record.as_ref()
    }

    /// The underlying transport error.
    pub fn error(&self) -> &TransportError {
        &self.error
    }

    /// Whether the failure counts as handled.
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Overrides the handled flag. Lowering it after a verb skips the
    /// retry without removing the operation.
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    fn begin(&mut self) -> SyncResult<()> {
        if self.outcome.is_some() {
            return Err(SyncError::resolution(
                "a resolution verb was already applied to this push error",
            ));
        }
        Ok(())
    }

    fn check_same_id(&self, record: &Record) -> SyncResult<()> {
        let record_id = record_id(record)
            .ok_or_else(|| SyncError::resolution("resolution record has no id"))?;
        let record_id = id_to_text(record_id)?;
        let own_id = id_to_text(&self.item_id)?;
        if record_id.eq_ignore_ascii_case(&own_id) {
            Ok(())
        } else {
            Err(SyncError::resolution(format!(
                "resolution record id '{record_id}' does not match operation id '{own_id}'"
            )))
        }
    }

    fn data_upsert(&self, record: Record) -> BatchOp {
        BatchOp::Upsert {
            table: self.table.clone(),
            record,
        }
    }

    fn data_delete(&self) -> BatchOp {
        BatchOp::Delete {
            table: self.table.clone(),
            id: self.item_id.clone(),
        }
    }

    /// Discards the operation and replaces the local record with `record`
    /// (typically the server's copy). Push proceeds to the next operation.
    pub fn cancel_and_update(&mut self, record: Record) -> SyncResult<()> {
        self.begin()?;
        self.check_same_id(&record)?;
        self.oplog.resolve_remove(vec![self.data_upsert(record)])?;
        self.finish(ResolutionOutcome::Proceed, true);
        Ok(())
    }

    /// Discards the operation and deletes the local record. Push proceeds
    /// to the next operation.
    pub fn cancel_and_discard(&mut self) -> SyncResult<()> {
        self.begin()?;
        self.oplog.resolve_remove(vec![self.data_delete()])?;
        self.finish(ResolutionOutcome::Proceed, true);
        Ok(())
    }

    /// Discards the operation, leaving the local record as it is. Push
    /// proceeds to the next operation.
    pub fn cancel(&mut self) -> SyncResult<()> {
        self.begin()?;
        self.oplog.resolve_remove(Vec::new())?;
        self.finish(ResolutionOutcome::Proceed, true);
        Ok(())
    }

    /// Replaces the local record and keeps the operation pending. Push
    /// retries the operation with the new record.
    pub fn update(&mut self, record: Record) -> SyncResult<()> {
        self.begin()?;
        self.check_same_id(&record)?;
        self.oplog.resolve_keep(vec![self.data_upsert(record)])?;
        self.finish(ResolutionOutcome::Retry, false);
        Ok(())
    }

    /// Rewrites the operation's action and retries it. A delete removes
    /// the local row; other actions upsert `record` (or keep the current
    /// client record when `record` is `None`).
    pub fn change_action(
        &mut self,
        action: OperationAction,
        record: Option<Record>,
    ) -> SyncResult<()> {
        self.begin()?;

        let data_ops = match action {
            OperationAction::Delete => vec![self.data_delete()],
            OperationAction::Insert | OperationAction::Update => {
                let record = match record.or_else(|| self.client_record.clone()) {
                    Some(record) => record,
                    None => {
                        return Err(SyncError::resolution(
                            "no record available for the new action",
                        ))
                    }
                };
                self.check_same_id(&record)?;
                vec![self.data_upsert(record)]
            }
        };

        self.oplog.resolve_replace_action(action, data_ops)?;
        self.finish(ResolutionOutcome::Retry, false);
        Ok(())
    }

    fn finish(&mut self, outcome: ResolutionOutcome, removed: bool) {
        self.outcome = Some(outcome);
        self.op_removed = removed;
        self.handled = true;
    }

    pub(crate) fn outcome(&self) -> Option<ResolutionOutcome> {
        self.outcome
    }

    pub(crate) fn op_removed(&self) -> bool {
        self.op_removed
    }

    pub(crate) fn into_error(self) -> SyncError {
        SyncError::Transport(self.error)
    }
}
