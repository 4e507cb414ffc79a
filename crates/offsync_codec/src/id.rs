//! Record identifier rules.
//!
//! String ids are non-empty printable text excluding a small set of
//! characters that are unsafe in resource URLs; integer ids are strictly
//! positive. The two domains do not mix within a table.

use crate::column::ColumnType;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Maximum length of a string id, in characters.
pub const MAX_ID_LENGTH: usize = 255;

const FORBIDDEN_CHARS: &[char] = &['"', '+', '?', '\\', '/', '`'];

/// Validates a record id value.
pub fn validate_id(value: &Value) -> CodecResult<()> {
    match value {
        Value::String(s) => validate_string_id(s),
        Value::Integer(i) if *i > 0 => Ok(()),
        Value::Integer(i) => Err(CodecError::invalid_id(format!(
            "integer id must be positive, got {i}"
        ))),
        other => Err(CodecError::invalid_id(format!(
            "id must be a string or a positive integer, got {}",
            other.type_name()
        ))),
    }
}

fn validate_string_id(id: &str) -> CodecResult<()> {
    if id.is_empty() {
        return Err(CodecError::invalid_id("id must not be empty"));
    }
    if id.chars().count() > MAX_ID_LENGTH {
        return Err(CodecError::invalid_id(format!(
            "id exceeds {MAX_ID_LENGTH} characters"
        )));
    }
    if id == "." || id == ".." {
        return Err(CodecError::invalid_id(format!("id '{id}' is reserved")));
    }
    for ch in id.chars() {
        if ch.is_control() {
            return Err(CodecError::invalid_id("id must not contain control characters"));
        }
        if FORBIDDEN_CHARS.contains(&ch) {
            return Err(CodecError::invalid_id(format!(
                "id must not contain '{ch}'"
            )));
        }
    }
    Ok(())
}

/// The canonical text form of an id, as stored by the operation log.
pub fn id_to_text(value: &Value) -> CodecResult<String> {
    validate_id(value)?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        other => Err(CodecError::invalid_id(format!(
            "id must be a string or a positive integer, got {}",
            other.type_name()
        ))),
    }
}

/// Reconstructs an id value from its canonical text form, given the id
/// column's declared type.
pub fn id_from_text(text: &str, id_type: ColumnType) -> CodecResult<Value> {
    match id_type {
        ColumnType::String => Ok(Value::String(text.to_string())),
        ColumnType::Integer => text
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| CodecError::invalid_id(format!("'{text}' is not an integer id"))),
        other => Err(CodecError::invalid_id(format!(
            "id column cannot be of type {}",
            other.as_str()
        ))),
    }
}
