//! Pending operations and the coalescing algebra.

/// The kind of a pending local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAction {
    /// The record was created locally.
    Insert,
    /// The record was modified locally.
    Update,
    /// The record was deleted locally.
    Delete,
}

impl OperationAction {
    /// The persisted token for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationAction::Insert => "insert",
            OperationAction::Update => "update",
            OperationAction::Delete => "delete",
        }
    }

    /// Parses a persisted token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "insert" => Some(OperationAction::Insert),
            "update" => Some(OperationAction::Update),
            "delete" => Some(OperationAction::Delete),
            _ => None,
        }
    }
}

/// One pending operation, as read from the operation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Sequence number, assigned at append time; push order.
    pub sequence: i64,
    /// Table the mutation targets.
    pub table: String,
    /// Canonical text form of the record id.
    pub item_id: String,
    /// The pending action.
    pub action: OperationAction,
}

/// What appending a new mutation does to the log entry for its
/// `(table, id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalesce {
    /// No entry exists: append a new one.
    Append,
    /// The existing entry already covers the mutation: leave it untouched.
    Keep,
    /// Rewrite the existing entry with this action, keeping its sequence.
    Replace(OperationAction),
    /// The mutations cancel out: remove the existing entry.
    Cancel,
}

/// Invalid cells of the coalescing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceError {
    /// An insert is pending, so the id exists locally.
    IdExists,
    /// A delete is pending, so the id does not exist locally.
    NotFound,
}

/// The coalescing algebra: combines a new mutation with the pending entry
/// for the same `(table, id)`, when one exists.
///
/// | existing \ new | insert | update | delete |
/// |---|---|---|---|
/// | insert | error (id exists) | keep insert | drop both |
/// | update | error (id exists) | keep update | replace with delete |
/// | delete | replace with update | error (not found) | keep delete |
pub fn coalesce(
    existing: Option<OperationAction>,
    incoming: OperationAction,
) -> Result<Coalesce, CoalesceError> {
    use OperationAction::{Delete, Insert, Update};

    let Some(existing) = existing else {
        return Ok(Coalesce::Append);
    };

    match (existing, incoming) {
        (Insert, Insert) | (Update, Insert) => Err(CoalesceError::IdExists),
        (Insert, Update) => Ok(Coalesce::Keep),
        (Insert, Delete) => Ok(Coalesce::Cancel),
        (Update, Update) => Ok(Coalesce::Keep),
        (Update, Delete) => Ok(Coalesce::Replace(Delete)),
        (Delete, Insert) => Ok(Coalesce::Replace(Update)),
        (Delete, Update) => Err(CoalesceError::NotFound),
        (Delete, Delete) => Ok(Coalesce::Keep),
    }
}
