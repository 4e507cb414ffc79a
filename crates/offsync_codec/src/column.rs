//! Column types and their definition tokens.

use crate::error::{CodecError, CodecResult};

/// Canonical column types accepted by table definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// Boolean, stored as 0/1.
    Boolean,
    /// Instant with millisecond precision, stored as epoch milliseconds.
    Date,
    /// Opaque structured object, stored as JSON text.
    Object,
    /// Opaque array, stored as JSON text.
    Array,
}

impl ColumnType {
    /// Parses a definition token, accepting the documented aliases
    /// (`int`, `float`, `text`, `bool`). Tokens are case-insensitive.
    pub fn parse(token: &str) -> CodecResult<Self> {
        match token.to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(ColumnType::String),
            "integer" | "int" => Ok(ColumnType::Integer),
            "real" | "float" => Ok(ColumnType::Real),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "object" => Ok(ColumnType::Object),
            "array" => Ok(ColumnType::Array),
            _ => Err(CodecError::UnknownColumnType {
                token: token.to_string(),
            }),
        }
    }

    /// The canonical token for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Object => "object",
            ColumnType::Array => "array",
        }
    }

    /// The SQL column declaration for this type.
    ///
    /// Text columns carry NOCASE collation so that equality comparison is
    /// case-insensitive, matching how record ids are compared throughout
    /// the system.
    pub fn sql_decl(&self) -> &'static str {
        match self {
            ColumnType::String | ColumnType::Object | ColumnType::Array => {
                "TEXT COLLATE NOCASE"
            }
            ColumnType::Integer | ColumnType::Boolean | ColumnType::Date => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }

    /// True when this type may back the `id` column.
    pub fn valid_for_id(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Integer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonical_tokens() {
        assert_eq!(ColumnType::parse("string").unwrap(), ColumnType::String);
        assert_eq!(ColumnType::parse("integer").unwrap(), ColumnType::Integer);
        assert_eq!(ColumnType::parse("real").unwrap(), ColumnType::Real);
        assert_eq!(ColumnType::parse("boolean").unwrap(), ColumnType::Boolean);
        assert_eq!(ColumnType::parse("date").unwrap(), ColumnType::Date);
        assert_eq!(ColumnType::parse("object").unwrap(), ColumnType::Object);
        assert_eq!(ColumnType::parse("array").unwrap(), ColumnType::Array);
    }

    #[test]
    fn parse_aliases() {
        assert_eq!(ColumnType::parse("int").unwrap(), ColumnType::Integer);
        assert_eq!(ColumnType::parse("float").unwrap(), ColumnType::Real);
        assert_eq!(ColumnType::parse("text").unwrap(), ColumnType::String);
        assert_eq!(ColumnType::parse("bool").unwrap(), ColumnType::Boolean);
        assert_eq!(ColumnType::parse("BOOL").unwrap(), ColumnType::Boolean);
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(matches!(
            ColumnType::parse("blob"),
            Err(CodecError::UnknownColumnType { .. })
        ));
    }

    #[test]
    fn id_types() {
        assert!(ColumnType::String.valid_for_id());
        assert!(ColumnType::Integer.valid_for_id());
        assert!(!ColumnType::Real.valid_for_id());
        assert!(!ColumnType::Date.valid_for_id());
    }
}
