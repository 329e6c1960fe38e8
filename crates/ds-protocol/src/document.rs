//! Dynamically-typed state documents and the operations on them.
//!
//! A document is a JSON tree whose root is always an object. Patches are
//! merged recursively, key paths address nested keys with `.` separators,
//! and `diff` reports what changed between two revisions of a document.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{ShadowError, ShadowResult};

/// A state document. The root is an object; children may be any JSON value.
pub type Document = Value;

/// Parse a patch document from JSON text.
pub fn parse_patch(text: &str) -> ShadowResult<Document> {
    let doc: Document = serde_json::from_str(text)
        .map_err(|e| ShadowError::Validation(format!("patch is not valid JSON: {e}")))?;
    validate_patch(&doc)?;
    Ok(doc)
}

/// Check that a document is a well-formed patch (an object at the root).
pub fn validate_patch(doc: &Document) -> ShadowResult<()> {
    if doc.is_object() {
        Ok(())
    } else {
        Err(ShadowError::Validation(format!(
            "patch must be a JSON object, got {}",
            kind_of(doc)
        )))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Recursively merge `patch` into `target`.
///
/// Objects merge key by key; any other value in the patch replaces what was
/// there. Keys absent from the patch are left untouched.
pub fn deep_merge(target: &mut Document, patch: &Document) {
    match (target, patch) {
        (Value::Object(base), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Remove the key at `path`. Returns whether it existed.
pub fn remove_path(doc: &mut Document, path: &KeyPath) -> bool {
    let Some((last, parents)) = path.segments.split_last() else {
        return false;
    };

    let mut cursor = doc;
    for segment in parents {
        match cursor.get_mut(segment.as_str()) {
            Some(next) if next.is_object() => cursor = next,
            _ => return false,
        }
    }

    cursor
        .as_object_mut()
        .is_some_and(|map| map.remove(last.as_str()).is_some())
}

/// Compute what changed from `prev` to `next`.
///
/// Returns `None` when nothing changed. Otherwise the result holds only the
/// keys whose values differ (recursing into nested objects), and keys that
/// disappeared map to `null`.
pub fn diff(prev: Option<&Document>, next: &Document) -> Option<Document> {
    let Some(prev) = prev else {
        return Some(next.clone());
    };

    match (prev, next) {
        (Value::Object(old), Value::Object(new)) => {
            let mut changed = Map::new();
            for (key, value) in new {
                if let Some(d) = diff(old.get(key), value) {
                    changed.insert(key.clone(), d);
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    changed.insert(key.clone(), Value::Null);
                }
            }
            (!changed.is_empty()).then_some(Value::Object(changed))
        }
        (old, new) if old == new => None,
        (_, new) => Some(new.clone()),
    }
}

/// A dotted path to a nested key, e.g. `network.wifi.ssid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl FromStr for KeyPath {
    type Err = ShadowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ShadowError::Validation("key path is empty".into()));
        }
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ShadowError::Validation(format!(
                "key path '{s}' has an empty segment"
            )));
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}
