//! JSON decoding into statically known schemas.
//!
//! # Design
//! Decoding goes through `serde_path_to_error` so a failure can name the
//! field it happened in (`items[1].id`) rather than only a line and column.
//! Unknown fields are ignored; the schema is whatever `T` declares.

use serde::de::DeserializeOwned;
use serde_path_to_error::Segment;

use crate::error::FetchError;

/// Turns a response payload into a typed value.
///
/// `JsonDecoder` is the only production implementation; the trait exists so
/// a coordinator can be given an instrumented decoder.
pub trait Decoder: Send + Sync {
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, FetchError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, FetchError> {
        decode(bytes)
    }
}

/// Decode `bytes` as JSON into `T`.
///
/// Rejects malformed syntax, missing required fields, type mismatches and
/// trailing data. Extra fields in the payload are accepted and dropped.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FetchError> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value = serde_path_to_error::deserialize(&mut de).map_err(|err| {
        let path = render_path(err.path());
        decode_error(bytes, path, err.into_inner())
    })?;
    de.end().map_err(|err| decode_error(bytes, None, err))?;
    Ok(value)
}

fn decode_error(bytes: &[u8], path: Option<String>, err: serde_json::Error) -> FetchError {
    let line = err.line();
    let column = err.column();
    let reason = strip_position(&err.to_string(), line, column);
    let positional = err.is_syntax() || err.is_eof();

    // A syntax error is not about any field, whatever the path reached.
    let field = if positional {
        None
    } else {
        match missing_field(&reason) {
            Some(name) => Some(match path {
                Some(parent) => format!("{parent}.{name}"),
                None => name.to_string(),
            }),
            None => path,
        }
    };

    let offset = positional.then(|| byte_offset(bytes, line, column));

    FetchError::Decode {
        field,
        reason,
        line,
        column,
        offset,
    }
}

fn render_path(path: &serde_path_to_error::Path) -> Option<String> {
    let mut out = String::new();
    for segment in path.iter() {
        match segment {
            Segment::Seq { index } => out.push_str(&format!("[{index}]")),
            Segment::Map { key } => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            Segment::Enum { variant } => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(variant);
            }
            Segment::Unknown => {}
        }
    }
    (!out.is_empty()).then_some(out)
}

/// serde_json appends " at line L column C" to its messages; the position is
/// carried separately in `FetchError::Decode`.
fn strip_position(message: &str, line: usize, column: usize) -> String {
    let suffix = format!(" at line {line} column {column}");
    message.strip_suffix(&suffix).unwrap_or(message).to_string()
}

fn missing_field(reason: &str) -> Option<&str> {
    let rest = reason.strip_prefix("missing field `")?;
    rest.split('`').next()
}

/// Convert serde_json's 1-based line/column into a byte offset.
fn byte_offset(bytes: &[u8], line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (index, chunk) in bytes.split(|b| *b == b'\n').enumerate() {
        if index + 1 == line {
            return (offset + column.saturating_sub(1)).min(bytes.len());
        }
        offset += chunk.len() + 1;
    }
    bytes.len()
}
