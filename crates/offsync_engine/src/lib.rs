//! # Offsync Engine
//!
//! The offline sync engine over the offsync table store.
//!
//! This crate provides:
//! - the [`SyncContext`]: CRUD on synced tables, incremental pull, ordered
//!   push and purge
//! - the persistent [`OperationLog`] of pending local mutations and its
//!   coalescing algebra
//! - the [`PushError`] controller handed to [`PushHandler`]s for per-op
//!   conflict and error resolution
//! - the [`TableTransport`] contract of the remote table service, with a
//!   scripted [`MockTransport`] for tests
//!
//! The engine performs no HTTP itself; see [`TableTransport`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod operation;
mod oplog;
mod push_error;
mod transport;
mod version;

pub use config::{PullSettings, DEFAULT_PAGE_SIZE};
pub use context::{PushResult, SyncContext, UnhandledConflict, CURSORS_TABLE};
pub use error::{SyncError, SyncResult};
pub use operation::{coalesce, Coalesce, CoalesceError, OperationAction, PendingOperation};
pub use oplog::{OperationLog, OPERATIONS_TABLE};
pub use push_error::{DefaultPushHandler, PushError, PushHandler};
pub use transport::{
    to_query_string, MockTransport, Page, RecordedRequest, TableTransport, TransportError,
};
pub use version::{etag_from_version, version_from_etag};
