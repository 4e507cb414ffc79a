//! # Offsync Codec
//!
//! Typed value domain for the offsync table store.
//!
//! This crate owns the boundary between the dynamic record shape used by
//! applications (column name → typed scalar) and the two encodings a record
//! crosses during its life:
//!
//! - the embedded store's scalar domain ([`SqlScalar`]), via
//!   [`serialize`]/[`deserialize`], and
//! - the JSON wire shape used by the remote table service, via
//!   [`record_to_json`]/[`record_from_json`].
//!
//! It also owns the record-identifier rules shared by every layer above it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod column;
mod error;
mod id;
mod json;
mod record;
mod serializer;
mod value;

pub use column::ColumnType;
pub use error::{CodecError, CodecResult};
pub use id::{id_from_text, id_to_text, validate_id, MAX_ID_LENGTH};
pub use json::{
    instant_from_json, record_from_json, record_to_json, value_from_json, value_to_json,
};
pub use record::{record_id, system, Record};
pub use serializer::{deserialize, serialize, SqlScalar};
pub use value::Value;
