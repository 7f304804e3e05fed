//! The decoded document tree and dotted-path addressing into it.
//!
//! Documents decode into [`Value`], a tagged variant of
//! `Null | Bool | Number | String | Array | Object`. Paths address mapping
//! levels only: every segment must name an existing key of an object, so a
//! missing key is a lookup failure rather than a null.

use super::TemplateError;

/// A decoded configuration document, or any node inside one.
pub type Value = serde_json::Value;

/// A mapping level of a [`Value`].
pub type Mapping = serde_json::Map<String, Value>;

/// Splits a dotted path into segments. The empty path has no segments and
/// addresses the whole document.
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Whether `path` is a well-formed dotted path: empty, or non-empty
/// segments of letters, digits, `_` and `-`.
pub fn is_valid_path(path: &str) -> bool {
    split_path(path).iter().all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    })
}

/// Walks `segments` from `root`, one mapping level per segment.
///
/// Fails on a missing key or when a segment has to step through a
/// non-mapping node.
pub fn walk<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Result<&'a Value, TemplateError> {
    let mut current = root;
    let mut walked = String::new();

    for segment in segments {
        let segment = segment.as_ref();
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);

        current = match current {
            Value::Object(map) => map
                .get(segment)
                .ok_or_else(|| TemplateError::MissingKey(walked.clone()))?,
            _ => return Err(TemplateError::NotAMapping(walked)),
        };
    }

    Ok(current)
}

/// Looks up a dotted path in the document.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Result<&'a Value, TemplateError> {
    walk(root, &split_path(path))
}

/// Renders a node the way string-mode lookups print it.
///
/// Strings print raw, null prints as nothing, and composite nodes print as
/// compact JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
