//! Structured queries and their translation to statements.
//!
//! [`translate`] is pure and stateless: it turns a [`Query`] into one or
//! two parameterized statements and never touches the store.

use offsync_codec::{SqlScalar, Value};

use crate::error::{StoreError, StoreResult};
use crate::schema::validate_identifier;

/// Comparison operators available in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less or equal.
    Le,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

/// A filter predicate over one table's columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare a column against a constant.
    Cmp {
        /// Column name.
        column: String,
        /// Comparison operator.
        op: CompareOp,
        /// Constant to compare against.
        value: Value,
    },
    /// Both sides must hold.
    And(Box<Filter>, Box<Filter>),
    /// Either side must hold.
    Or(Box<Filter>, Box<Filter>),
    /// The inner filter must not hold.
    Not(Box<Filter>),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CompareOp::Eq, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CompareOp::Gt, value)
    }

    /// A comparison with an explicit operator.
    pub fn cmp(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Conjunction of two filters.
    pub fn and(self, other: Filter) -> Self {
        Filter::And(Box::new(self), Box::new(other))
    }

    /// Disjunction of two filters.
    pub fn or(self, other: Filter) -> Self {
        Filter::Or(Box::new(self), Box::new(other))
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to sort on.
    pub column: String,
    /// Direction.
    pub dir: SortDir,
}

/// A structured query over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Target table.
    pub table: String,
    /// Optional filter predicate.
    pub filter: Option<Filter>,
    /// Ordering terms, applied in sequence.
    pub order_by: Vec<OrderBy>,
    /// Rows to skip.
    pub skip: Option<u64>,
    /// Maximum rows to return.
    pub top: Option<u64>,
    /// Projection; empty means all columns.
    pub select: Vec<String>,
    /// When set, the translation adds a COUNT(*) statement over the same
    /// filter and reads report the total alongside the page.
    pub include_total_count: bool,
}

impl Query {
    /// Creates a query returning every record of a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order_by: Vec::new(),
            skip: None,
            top: None,
            select: Vec::new(),
            include_total_count: false,
        }
    }

    /// Sets the filter predicate.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends an ordering term.
    pub fn order_by(mut self, column: impl Into<String>, dir: SortDir) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            dir,
        });
        self
    }

    /// Sets the number of rows to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the maximum number of rows to return.
    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Restricts the projection to the given columns.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Requests the total count alongside the page.
    pub fn with_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }

    /// True when the query spans the whole table: no filter, no paging.
    pub fn is_whole_table(&self) -> bool {
        self.filter.is_none() && self.skip.is_none() && self.top.is_none()
    }
}

/// A single parameterized statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// Statement text with positional placeholders.
    pub sql: String,
    /// Parameters, in placeholder order.
    pub params: Vec<SqlScalar>,
}

/// Translates a query into an ordered list of one or two statements.
///
/// The first statement selects the page; when the query asks for the total
/// count, a second statement counts over the same filter.
pub fn translate(query: &Query) -> StoreResult<Vec<SqlStatement>> {
    validate_identifier(&query.table)?;

    let projection = if query.select.is_empty() {
        "*".to_string()
    } else {
        for column in &query.select {
            validate_identifier(column)?;
        }
        query
            .select
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut params = Vec::new();
    let where_clause = match &query.filter {
        Some(filter) => format!(" WHERE {}", render_filter(filter, &mut params)?),
        None => String::new(),
    };

    let mut sql = format!("SELECT {projection} FROM \"{}\"{where_clause}", query.table);

    if !query.order_by.is_empty() {
        let mut terms = Vec::with_capacity(query.order_by.len());
        for term in &query.order_by {
            validate_identifier(&term.column)?;
            let dir = match term.dir {
                SortDir::Asc => "ASC",
                SortDir::Desc => "DESC",
            };
            terms.push(format!("\"{}\" {dir}", term.column));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }

    match (query.top, query.skip) {
        (Some(top), Some(skip)) => sql.push_str(&format!(" LIMIT {top} OFFSET {skip}")),
        (Some(top), None) => sql.push_str(&format!(" LIMIT {top}")),
        (None, Some(skip)) => sql.push_str(&format!(" LIMIT -1 OFFSET {skip}")),
        (None, None) => {}
    }

    let mut statements = vec![SqlStatement {
        sql,
        params: params.clone(),
    }];

    if query.include_total_count {
        statements.push(SqlStatement {
            sql: format!("SELECT COUNT(*) FROM \"{}\"{where_clause}", query.table),
            params,
        });
    }

    Ok(statements)
}

fn render_filter(filter: &Filter, params: &mut Vec<SqlScalar>) -> StoreResult<String> {
    match filter {
        Filter::Cmp { column, op, value } => {
            validate_identifier(column)?;
            match (op, value) {
                // NULL never matches '=' in the engine; use IS NULL.
                (CompareOp::Eq, Value::Null) => Ok(format!("\"{column}\" IS NULL")),
                (CompareOp::Ne, Value::Null) => Ok(format!("\"{column}\" IS NOT NULL")),
                (_, Value::Null) => Err(StoreError::invalid_argument(
                    "null is only comparable with = and <>",
                )),
                _ => {
                    params.push(filter_scalar(value)?);
                    Ok(format!("\"{column}\" {} ?", op.sql()))
                }
            }
        }
        Filter::And(a, b) => Ok(format!(
            "({} AND {})",
            render_filter(a, params)?,
            render_filter(b, params)?
        )),
        Filter::Or(a, b) => Ok(format!(
            "({} OR {})",
            render_filter(a, params)?,
            render_filter(b, params)?
        )),
        Filter::Not(inner) => Ok(format!("(NOT {})", render_filter(inner, params)?)),
    }
}

/// Serializes a filter constant by its own variant; storage encodings are
/// uniform per variant, so no schema is needed here.
fn filter_scalar(value: &Value) -> StoreResult<SqlScalar> {
    match value {
        Value::String(s) => Ok(SqlScalar::Text(s.clone())),
        Value::Integer(i) => Ok(SqlScalar::Integer(*i)),
        Value::Real(f) => Ok(SqlScalar::Real(*f)),
        Value::Boolean(b) => Ok(SqlScalar::Integer(i64::from(*b))),
        Value::Date(d) => Ok(SqlScalar::Integer(d.timestamp_millis())),
        Value::Null | Value::Object(_) | Value::Array(_) => Err(StoreError::invalid_argument(
            format!("{} values cannot be compared in a filter", value.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_select() {
        let stmts = translate(&Query::new("items")).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].sql, "SELECT * FROM \"items\"");
        assert!(stmts[0].params.is_empty());
    }

    #[test]
    fn filter_order_and_paging() {
        let query = Query::new("items")
            .with_filter(Filter::eq("kind", "a").and(Filter::gt("count", 5i64)))
            .order_by("count", SortDir::Desc)
            .skip(10)
            .top(20);

        let stmts = translate(&query).unwrap();
        assert_eq!(
            stmts[0].sql,
            "SELECT * FROM \"items\" WHERE (\"kind\" = ? AND \"count\" > ?) \
             ORDER BY \"count\" DESC LIMIT 20 OFFSET 10"
        );
        assert_eq!(
            stmts[0].params,
            vec![SqlScalar::Text("a".into()), SqlScalar::Integer(5)]
        );
    }

    #[test]
    fn count_statement_shares_filter() {
        let query = Query::new("items")
            .with_filter(Filter::eq("kind", "a"))
            .top(5)
            .with_total_count();

        let stmts = translate(&query).unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[1].sql,
            "SELECT COUNT(*) FROM \"items\" WHERE \"kind\" = ?"
        );
        assert_eq!(stmts[0].params, stmts[1].params);
        // The count statement must not inherit paging.
        assert!(!stmts[1].sql.contains("LIMIT"));
    }

    #[test]
    fn projection_is_quoted() {
        let query = Query::new("items").select(&["id", "count"]);
        let stmts = translate(&query).unwrap();
        assert_eq!(stmts[0].sql, "SELECT \"id\", \"count\" FROM \"items\"");
    }

    #[test]
    fn null_comparisons() {
        let stmts = translate(
            &Query::new("items").with_filter(Filter::cmp("note", CompareOp::Eq, Value::Null)),
        )
        .unwrap();
        assert_eq!(stmts[0].sql, "SELECT * FROM \"items\" WHERE \"note\" IS NULL");
        assert!(stmts[0].params.is_empty());

        assert!(translate(
            &Query::new("items").with_filter(Filter::cmp("note", CompareOp::Gt, Value::Null)),
        )
        .is_err());
    }

    #[test]
    fn dates_become_millis() {
        use chrono::TimeZone;
        let ts = chrono::Utc.timestamp_millis_opt(1_500).unwrap();
        let stmts =
            translate(&Query::new("items").with_filter(Filter::gt("updatedAt", ts))).unwrap();
        assert_eq!(stmts[0].params, vec![SqlScalar::Integer(1_500)]);
    }

    #[test]
    fn hostile_identifiers_rejected() {
        assert!(translate(&Query::new("items\" --")).is_err());
        assert!(translate(
            &Query::new("items").with_filter(Filter::eq("a\"b", 1i64))
        )
        .is_err());
        assert!(translate(&Query::new("items").select(&["a;b"])).is_err());
    }

    #[test]
    fn whole_table_detection() {
        assert!(Query::new("t").is_whole_table());
        assert!(!Query::new("t").top(1).is_whole_table());
        assert!(!Query::new("t")
            .with_filter(Filter::eq("id", "x"))
            .is_whole_table());
        // Projection and ordering do not narrow the row set.
        assert!(Query::new("t").select(&["id"]).is_whole_table());
    }
}
