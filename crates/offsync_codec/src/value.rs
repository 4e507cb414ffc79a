//! Dynamic typed scalar for table records.

use chrono::{DateTime, Utc};

/// A typed scalar as it appears in a record.
///
/// Every column of a record holds exactly one of these variants; the table
/// schema decides which variant a read produces. `Object` and `Array` are
/// opaque structured blobs carried as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / null value.
    Null,
    /// UTF-8 string.
    String(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// Boolean.
    Boolean(bool),
    /// Instant with millisecond precision.
    Date(DateTime<Utc>),
    /// Opaque structured object, stored as JSON text.
    Object(serde_json::Value),
    /// Opaque array, stored as JSON text.
    Array(serde_json::Value),
}

impl Value {
    /// Returns true for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string slice if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Integer`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float if this is a `Real` (integers widen).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the boolean if this is a `Boolean`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the instant if this is a `Date`.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// A short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accessors() {
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert_eq!(Value::from(7i64).as_i64(), Some(7));
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::from(3i64).as_f64(), Some(3.0));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::Null.is_null());

        let ts = Utc.timestamp_millis_opt(1_000).unwrap();
        assert_eq!(Value::from(ts).as_date(), Some(ts));
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::from(1i64).type_name(), "integer");
        assert_eq!(
            Value::Object(serde_json::json!({"a": 1})).type_name(),
            "object"
        );
    }
}
