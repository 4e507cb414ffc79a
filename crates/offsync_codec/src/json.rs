//! JSON wire conversion for records.
//!
//! The remote table service speaks JSON; the local store speaks typed
//! values. Dates cross the wire as RFC 3339 text with millisecond
//! precision, everything else maps onto its natural JSON counterpart.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value as Json;

use crate::column::ColumnType;
use crate::error::{CodecError, CodecResult};
use crate::record::Record;
use crate::value::Value;

/// Converts a typed value into its wire representation.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::String(s) => Json::String(s.clone()),
        Value::Integer(i) => Json::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Boolean(b) => Json::Bool(*b),
        Value::Date(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Object(v) | Value::Array(v) => v.clone(),
    }
}

/// Converts a wire value into the column's declared type.
pub fn value_from_json(column: &str, json: &Json, ty: ColumnType) -> CodecResult<Value> {
    match (json, ty) {
        (Json::Null, _) => Ok(Value::Null),
        (Json::String(s), ColumnType::String) => Ok(Value::String(s.clone())),
        (Json::Number(n), ColumnType::Integer) if n.as_i64().is_some() => {
            Ok(Value::Integer(n.as_i64().unwrap_or_default()))
        }
        (Json::Number(n), ColumnType::Real) if n.as_f64().is_some() => {
            Ok(Value::Real(n.as_f64().unwrap_or_default()))
        }
        (Json::Bool(b), ColumnType::Boolean) => Ok(Value::Boolean(*b)),
        (json, ColumnType::Date) => instant_from_json(json)
            .map(Value::Date)
            .ok_or_else(|| CodecError::InvalidDate {
                text: json.to_string(),
            }),
        (json @ Json::Object(_), ColumnType::Object) => Ok(Value::Object(json.clone())),
        (json @ Json::Array(_), ColumnType::Array) => Ok(Value::Array(json.clone())),
        (json, ty) => Err(CodecError::type_mismatch(
            column,
            ty.as_str(),
            json_type_name(json),
        )),
    }
}

/// Converts a record to the JSON object sent to the remote service.
pub fn record_to_json(record: &Record) -> Json {
    let map = record
        .iter()
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect::<serde_json::Map<_, _>>();
    Json::Object(map)
}

/// Converts a JSON object from the remote service into a record, typed by
/// the given column map. Keys that are not declared columns are ignored.
pub fn record_from_json(
    json: &Json,
    columns: &BTreeMap<String, ColumnType>,
) -> CodecResult<Record> {
    let object = json.as_object().ok_or_else(|| {
        CodecError::type_mismatch("<record>", "object", json_type_name(json))
    })?;

    let mut record = Record::new();
    for (name, wire) in object {
        if let Some(&ty) = columns.get(name) {
            record.insert(name.clone(), value_from_json(name, wire, ty)?);
        }
    }
    Ok(record)
}

/// Reads an instant from a wire value, accepting RFC 3339 text or epoch
/// milliseconds. Used for cursor tracking even when the local table does
/// not declare the column.
pub fn instant_from_json(json: &Json) -> Option<DateTime<Utc>> {
    match json {
        Json::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Json::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn json_type_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> BTreeMap<String, ColumnType> {
        [
            ("id".to_string(), ColumnType::String),
            ("count".to_string(), ColumnType::Integer),
            ("ratio".to_string(), ColumnType::Real),
            ("done".to_string(), ColumnType::Boolean),
            ("updatedAt".to_string(), ColumnType::Date),
            ("meta".to_string(), ColumnType::Object),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn record_round_trip() {
        let json = json!({
            "id": "a1",
            "count": 3,
            "ratio": 0.5,
            "done": true,
            "updatedAt": "2024-01-01T00:00:01.250Z",
            "meta": {"tag": "x"},
            "undeclared": "dropped"
        });

        let record = record_from_json(&json, &columns()).unwrap();
        assert_eq!(record.get("id"), Some(&Value::from("a1")));
        assert_eq!(record.get("count"), Some(&Value::from(3i64)));
        assert_eq!(record.get("done"), Some(&Value::from(true)));
        assert!(!record.contains_key("undeclared"));

        let date = record.get("updatedAt").and_then(|v| v.as_date()).unwrap();
        assert_eq!(date.timestamp_millis(), 1_704_067_201_250);

        let back = record_to_json(&record);
        assert_eq!(back["updatedAt"], json!("2024-01-01T00:00:01.250Z"));
        assert_eq!(back["meta"], json!({"tag": "x"}));
        assert_eq!(back.get("undeclared"), None);
    }

    #[test]
    fn instants_accept_text_and_millis() {
        let from_text = instant_from_json(&json!("2024-01-01T00:00:01.000Z")).unwrap();
        let from_ms = instant_from_json(&json!(1_704_067_201_000i64)).unwrap();
        assert_eq!(from_text, from_ms);
        assert!(instant_from_json(&json!(true)).is_none());
    }

    #[test]
    fn wire_type_mismatch_fails() {
        let err = value_from_json("count", &json!("three"), ColumnType::Integer);
        assert!(matches!(err, Err(CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn non_object_record_fails() {
        assert!(record_from_json(&json!([1, 2]), &columns()).is_err());
    }
}
