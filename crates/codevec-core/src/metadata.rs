//! Metadata normalization
//!
//! The vector database only stores flat metadata: strings, numbers,
//! booleans and null. Chunk metadata coming from the chunker is richer
//! (lists of symbols, nested objects describing accessed entities), so it
//! is coerced here before upload.
//!
//! Text produced here is byte-identical to what the earlier Python loader
//! wrote, so collections built by either tool filter the same way.

use std::io;

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};

use crate::{Metadata, MetadataValue};

/// Keys copied verbatim to the top level of a record's metadata so they
/// stay filterable with their native types.
pub const PROMOTED_FIELDS: &[&str] = &[
    "entity_type",
    "package_name",
    "file_path",
    "start_line",
    "end_line",
    "entity_name",
];

/// Delimiter used when joining lists of primitives
pub const LIST_DELIMITER: &str = ", ";

/// Coerce arbitrary metadata into primitive values.
///
/// Scalars pass through. Lists of strings, numbers or booleans are joined
/// with [`LIST_DELIMITER`]; every other list and every nested object is
/// serialized to JSON text, which makes its inner fields unfilterable.
/// Booleans in joined lists read `True`/`False`; JSON text uses `", "` and
/// `": "` separators, escapes non-ASCII characters and keeps key order.
pub fn normalize_metadata(raw: &Map<String, Value>) -> Metadata {
    raw.iter()
        .map(|(key, value)| (key.clone(), normalize_value(value)))
        .collect()
}

fn normalize_value(value: &Value) -> MetadataValue {
    if let Some(scalar) = MetadataValue::from_json(value) {
        return scalar;
    }

    match value {
        Value::Array(items) if items.iter().all(is_joinable) => MetadataValue::Str(
            items
                .iter()
                .map(join_text)
                .collect::<Vec<_>>()
                .join(LIST_DELIMITER),
        ),
        other => MetadataValue::Str(to_json_text(other)),
    }
}

fn is_joinable(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn join_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

/// JSON with spaced separators and `\uXXXX` escapes for non-ASCII text
struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

fn to_json_text(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, SpacedAsciiFormatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

/// Write allow-listed raw values on top of normalized metadata.
///
/// Only keys present in `raw` with a scalar value are promoted; list or
/// object values keep their normalized text form.
pub fn promote_fields(raw: &Map<String, Value>, normalized: &mut Metadata, fields: &[&str]) {
    for field in fields {
        if let Some(value) = raw.get(*field).and_then(MetadataValue::from_json) {
            normalized.insert((*field).to_string(), value);
        }
    }
}

/// Normalize a chunk's metadata and promote [`PROMOTED_FIELDS`]
pub fn prepare_metadata(raw: &Map<String, Value>) -> Metadata {
    let mut metadata = normalize_metadata(raw);
    promote_fields(raw, &mut metadata, PROMOTED_FIELDS);
    metadata
}
