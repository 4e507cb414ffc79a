//! The typed ↔ store-scalar boundary.
//!
//! The embedded engine only stores NULL, INTEGER, REAL and TEXT; every
//! declared column type maps onto one of those. This module is the single
//! place where that mapping lives.

use chrono::TimeZone;
use chrono::Utc;

use crate::column::ColumnType;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// A scalar in the embedded store's domain.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlScalar {
    /// SQL NULL.
    Null,
    /// INTEGER.
    Integer(i64),
    /// REAL.
    Real(f64),
    /// TEXT.
    Text(String),
}

/// Serializes a typed value for storage in a column of the given type.
///
/// Encodings: booleans as 0/1, dates as epoch milliseconds, objects and
/// arrays as JSON text. Integer-to-real widening is the only permitted
/// coercion; any other mismatch between value and declared type fails.
pub fn serialize(column: &str, value: &Value, ty: ColumnType) -> CodecResult<SqlScalar> {
    match (value, ty) {
        (Value::Null, _) => Ok(SqlScalar::Null),
        (Value::String(s), ColumnType::String) => Ok(SqlScalar::Text(s.clone())),
        (Value::Integer(i), ColumnType::Integer) => Ok(SqlScalar::Integer(*i)),
        (Value::Integer(i), ColumnType::Real) => Ok(SqlScalar::Real(*i as f64)),
        (Value::Real(f), ColumnType::Real) => Ok(SqlScalar::Real(*f)),
        (Value::Boolean(b), ColumnType::Boolean) => Ok(SqlScalar::Integer(i64::from(*b))),
        (Value::Date(d), ColumnType::Date) => Ok(SqlScalar::Integer(d.timestamp_millis())),
        (Value::Object(v), ColumnType::Object) | (Value::Array(v), ColumnType::Array) => {
            Ok(SqlScalar::Text(serde_json::to_string(v)?))
        }
        (value, ty) => Err(CodecError::type_mismatch(
            column,
            ty.as_str(),
            value.type_name(),
        )),
    }
}

/// Deserializes a stored scalar back into the column's declared type.
pub fn deserialize(column: &str, scalar: SqlScalar, ty: ColumnType) -> CodecResult<Value> {
    match (scalar, ty) {
        (SqlScalar::Null, _) => Ok(Value::Null),
        (SqlScalar::Text(s), ColumnType::String) => Ok(Value::String(s)),
        (SqlScalar::Integer(i), ColumnType::Integer) => Ok(Value::Integer(i)),
        (SqlScalar::Integer(i), ColumnType::Real) => Ok(Value::Real(i as f64)),
        (SqlScalar::Real(f), ColumnType::Real) => Ok(Value::Real(f)),
        (SqlScalar::Integer(i), ColumnType::Boolean) => Ok(Value::Boolean(i != 0)),
        (SqlScalar::Integer(ms), ColumnType::Date) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Value::Date)
            .ok_or_else(|| CodecError::InvalidDate {
                text: ms.to_string(),
            }),
        (SqlScalar::Text(s), ColumnType::Object) => Ok(Value::Object(serde_json::from_str(&s)?)),
        (SqlScalar::Text(s), ColumnType::Array) => Ok(Value::Array(serde_json::from_str(&s)?)),
        (scalar, ty) => Err(CodecError::type_mismatch(
            column,
            ty.as_str(),
            scalar_name(&scalar),
        )),
    }
}

fn scalar_name(scalar: &SqlScalar) -> &'static str {
    match scalar {
        SqlScalar::Null => "NULL",
        SqlScalar::Integer(_) => "INTEGER",
        SqlScalar::Real(_) => "REAL",
        SqlScalar::Text(_) => "TEXT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_columns() {
        let scalar = serialize("name", &Value::from("x"), ColumnType::String).unwrap();
        assert_eq!(scalar, SqlScalar::Text("x".into()));
        assert_eq!(
            deserialize("name", scalar, ColumnType::String).unwrap(),
            Value::from("x")
        );
    }

    #[test]
    fn boolean_encoding() {
        assert_eq!(
            serialize("b", &Value::from(true), ColumnType::Boolean).unwrap(),
            SqlScalar::Integer(1)
        );
        assert_eq!(
            serialize("b", &Value::from(false), ColumnType::Boolean).unwrap(),
            SqlScalar::Integer(0)
        );
        assert_eq!(
            deserialize("b", SqlScalar::Integer(1), ColumnType::Boolean).unwrap(),
            Value::from(true)
        );
    }

    #[test]
    fn date_encoding_is_epoch_millis() {
        let ts = Utc.timestamp_millis_opt(1_704_067_201_500).unwrap();
        let scalar = serialize("d", &Value::from(ts), ColumnType::Date).unwrap();
        assert_eq!(scalar, SqlScalar::Integer(1_704_067_201_500));
        assert_eq!(
            deserialize("d", scalar, ColumnType::Date).unwrap(),
            Value::from(ts)
        );
    }

    #[test]
    fn integer_widens_to_real() {
        assert_eq!(
            serialize("r", &Value::from(2i64), ColumnType::Real).unwrap(),
            SqlScalar::Real(2.0)
        );
        assert_eq!(
            deserialize("r", SqlScalar::Integer(2), ColumnType::Real).unwrap(),
            Value::Real(2.0)
        );
    }

    #[test]
    fn object_and_array_as_json_text() {
        let obj = Value::Object(json!({"k": [1, 2]}));
        let scalar = serialize("o", &obj, ColumnType::Object).unwrap();
        match &scalar {
            SqlScalar::Text(s) => assert!(s.contains("\"k\"")),
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(deserialize("o", scalar, ColumnType::Object).unwrap(), obj);

        let arr = Value::Array(json!([1, "two"]));
        let scalar = serialize("a", &arr, ColumnType::Array).unwrap();
        assert_eq!(deserialize("a", scalar, ColumnType::Array).unwrap(), arr);
    }

    #[test]
    fn null_round_trips_for_any_type() {
        for ty in [
            ColumnType::String,
            ColumnType::Integer,
            ColumnType::Real,
            ColumnType::Boolean,
            ColumnType::Date,
            ColumnType::Object,
            ColumnType::Array,
        ] {
            assert_eq!(serialize("c", &Value::Null, ty).unwrap(), SqlScalar::Null);
            assert_eq!(deserialize("c", SqlScalar::Null, ty).unwrap(), Value::Null);
        }
    }

    #[test]
    fn mismatches_are_rejected() {
        assert!(serialize("c", &Value::from("x"), ColumnType::Integer).is_err());
        assert!(serialize("c", &Value::from(true), ColumnType::Date).is_err());
        assert!(serialize("c", &Value::from(1.5), ColumnType::Integer).is_err());
        assert!(deserialize("c", SqlScalar::Text("x".into()), ColumnType::Integer).is_err());
        assert!(deserialize("c", SqlScalar::Real(1.0), ColumnType::Boolean).is_err());
    }
}
