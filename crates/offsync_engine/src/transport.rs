//! The remote table service contract.
//!
//! The engine never performs HTTP itself; it talks to a [`TableTransport`],
//! which carries the request/response contract of the remote table service.
//! Real implementations wrap an HTTP client; tests use [`MockTransport`]
//! or an in-memory remote.

use std::collections::VecDeque;

use offsync_store::{CompareOp, Filter, Query, SortDir};
use parking_lot::Mutex;
use serde_json::Value as Json;
use thiserror::Error;

use offsync_codec::Value;

/// Errors surfaced by a transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}")]
    Http {
        /// Response status code.
        status: u16,
        /// Parsed response body, when one was returned.
        body: Option<Json>,
    },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// The HTTP status, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for responses that report a version conflict: 412 precondition
    /// failures and 409 insert collisions.
    pub fn is_conflict(&self) -> bool {
        matches!(self.status(), Some(412) | Some(409))
    }

    /// The server entity attached to the response, when present.
    pub fn server_body(&self) -> Option<&Json> {
        match self {
            TransportError::Http { body, .. } => body.as_ref(),
            _ => None,
        }
    }
}

/// One page of records returned by a read.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records, in server order.
    pub records: Vec<Json>,
}

impl Page {
    /// Creates a page from records.
    pub fn new(records: Vec<Json>) -> Self {
        Self { records }
    }
}

/// The wire contract of the remote table service.
///
/// - `read` is `GET /tables/{name}?<odata>`
/// - `insert` is `POST /tables/{name}`
/// - `update` is `PATCH /tables/{name}/{id}` with optional `If-Match`
/// - `delete` is `DELETE /tables/{name}/{id}` with optional `If-Match`
///
/// `if_match` values are full ETag header values (see
/// [`etag_from_version`](crate::etag_from_version)); `id` is the canonical
/// text form of the record id. Implementations attach the deployment's
/// constant API-version header to every request.
pub trait TableTransport: Send + Sync {
    /// Reads one page of records matching the query.
    fn read(&self, table: &str, query: &Query) -> Result<Page, TransportError>;

    /// Creates a record; returns the created entity.
    fn insert(&self, table: &str, record: &Json) -> Result<Json, TransportError>;

    /// Updates a record; returns the updated entity. A version mismatch is
    /// `Http { status: 412, .. }` with the server entity as the body.
    fn update(
        &self,
        table: &str,
        id: &str,
        record: &Json,
        if_match: Option<&str>,
    ) -> Result<Json, TransportError>;

    /// Deletes a record. A version mismatch is `Http { status: 412, .. }`.
    fn delete(&self, table: &str, id: &str, if_match: Option<&str>)
        -> Result<(), TransportError>;
}

/// Renders a query as an OData query string, for transports that format
/// URLs. Values are not percent-encoded; the HTTP layer owns that.
pub fn to_query_string(query: &Query) -> String {
    let mut parts = Vec::new();

    if let Some(filter) = &query.filter {
        parts.push(format!("$filter={}", odata_filter(filter)));
    }
    if !query.order_by.is_empty() {
        let terms = query
            .order_by
            .iter()
            .map(|o| {
                let dir = match o.dir {
                    SortDir::Asc => "asc",
                    SortDir::Desc => "desc",
                };
                format!("{} {dir}", o.column)
            })
            .collect::<Vec<_>>()
            .join(",");
        parts.push(format!("$orderby={terms}"));
    }
    if !query.select.is_empty() {
        parts.push(format!("$select={}", query.select.join(",")));
    }
    if let Some(skip) = query.skip {
        parts.push(format!("$skip={skip}"));
    }
    if let Some(top) = query.top {
        parts.push(format!("$top={top}"));
    }
    if query.include_total_count {
        parts.push("$inlinecount=allpages".to_string());
    }

    parts.join("&")
}

fn odata_filter(filter: &Filter) -> String {
    match filter {
        Filter::Cmp { column, op, value } => {
            let op = match op {
                CompareOp::Eq => "eq",
                CompareOp::Ne => "ne",
                CompareOp::Gt => "gt",
                CompareOp::Ge => "ge",
                CompareOp::Lt => "lt",
                CompareOp::Le => "le",
            };
            format!("{column} {op} {}", odata_literal(value))
        }
        Filter::And(a, b) => format!("({} and {})", odata_filter(a), odata_filter(b)),
        Filter::Or(a, b) => format!("({} or {})", odata_filter(a), odata_filter(b)),
        Filter::Not(inner) => format!("not ({})", odata_filter(inner)),
    }
}

fn odata_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Date(d) => format!(
            "datetimeoffset'{}'",
            d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        ),
        Value::Object(v) | Value::Array(v) => v.to_string(),
    }
}

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedRequest {
    /// A page read.
    Read {
        /// Target table.
        table: String,
        /// The rendered OData query string.
        query: String,
    },
    /// An insert.
    Insert {
        /// Target table.
        table: String,
        /// Request body.
        body: Json,
    },
    /// An update.
    Update {
        /// Target table.
        table: String,
        /// Record id.
        id: String,
        /// Request body.
        body: Json,
        /// `If-Match` header value, when sent.
        if_match: Option<String>,
    },
    /// A delete.
    Delete {
        /// Target table.
        table: String,
        /// Record id.
        id: String,
        /// `If-Match` header value, when sent.
        if_match: Option<String>,
    },
}

/// A transport with scripted responses, for tests.
///
/// Responses queue per method and are consumed in order. An exhausted read
/// queue yields empty pages (so pulls terminate); other exhausted queues
/// fail the call.
#[derive(Default)]
pub struct MockTransport {
    reads: Mutex<VecDeque<Result<Page, TransportError>>>,
    inserts: Mutex<VecDeque<Result<Json, TransportError>>>,
    updates: Mutex<VecDeque<Result<Json, TransportError>>>,
    deletes: Mutex<VecDeque<Result<(), TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Creates a transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a read response.
    pub fn push_read(&self, response: Result<Page, TransportError>) {
        self.reads.lock().push_back(response);
    }

    /// Queues an insert response.
    pub fn push_insert(&self, response: Result<Json, TransportError>) {
        self.inserts.lock().push_back(response);
    }

    /// Queues an update response.
    pub fn push_update(&self, response: Result<Json, TransportError>) {
        self.updates.lock().push_back(response);
    }

    /// Queues a delete response.
    pub fn push_delete(&self, response: Result<(), TransportError>) {
        self.deletes.lock().push_back(response);
    }

    /// All requests observed so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl TableTransport for MockTransport {
    fn read(&self, table: &str, query: &Query) -> Result<Page, TransportError> {
        self.requests.lock().push(RecordedRequest::Read {
            table: table.to_string(),
            query: to_query_string(query),
        });
        self.reads.lock().pop_front().unwrap_or_else(|| Ok(Page::default()))
    }

    fn insert(&self, table: &str, record: &Json) -> Result<Json, TransportError> {
        self.requests.lock().push(RecordedRequest::Insert {
            table: table.to_string(),
            body: record.clone(),
        });
        self.inserts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted insert response".into())))
    }

    fn update(
        &self,
        table: &str,
        id: &str,
        record: &Json,
        if_match: Option<&str>,
    ) -> Result<Json, TransportError> {
        self.requests.lock().push(RecordedRequest::Update {
            table: table.to_string(),
            id: id.to_string(),
            body: record.clone(),
            if_match: if_match.map(str::to_string),
        });
        self.updates
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted update response".into())))
    }

    fn delete(
        &self,
        table: &str,
        id: &str,
        if_match: Option<&str>,
    ) -> Result<(), TransportError> {
        self.requests.lock().push(RecordedRequest::Delete {
            table: table.to_string(),
            id: id.to_string(),
            if_match: if_match.map(str::to_string),
        });
        self.deletes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted delete response".into())))
    }
}
