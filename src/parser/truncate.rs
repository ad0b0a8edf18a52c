//! Bounded copies of large tool inputs and outputs.

use std::borrow::Cow;

use serde_json::Value;

/// Appended to any string that was cut short.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Default character limit for tool inputs and results.
pub const DEFAULT_MAX_LENGTH: usize = 1024;

/// Cut `s` to at most `max_len` characters, appending [`TRUNCATION_MARKER`]
/// when anything was removed.
#[must_use]
pub fn truncate_str(s: &str, max_len: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_len) {
        Some((cut, _)) => Cow::Owned(format!("{}{TRUNCATION_MARKER}", &s[..cut])),
        None => Cow::Borrowed(s),
    }
}

/// Copy `value`, truncating every string found at any depth of nested
/// objects and arrays. Keys and non-string scalars are kept as-is.
#[must_use]
pub fn truncate_value(value: &Value, max_len: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_str(s, max_len).into_owned()),
        Value::Array(items) => Value::Array(items.iter().map(|v| truncate_value(v, max_len)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_value(v, max_len)))
                .collect(),
        ),
        other => other.clone(),
    }
}
