//! Expansion of minified lazy metadata.
//!
//! In a minified version list every entry only carries the keys that differ
//! from the previous entry; the string `"__unset"` removes an inherited key.

use serde_json::{Map, Value};

/// Value of the `minified` marker in lazy metadata files.
pub const MINIFIED_FORMAT: &str = "composer/2.0";

const UNSET: &str = "__unset";

pub fn expand(versions: &[Value]) -> Vec<Value> {
    let mut expanded = Vec::with_capacity(versions.len());
    let mut previous: Map<String, Value> = Map::new();

    for entry in versions {
        let Value::Object(fields) = entry else {
            continue;
        };
        for (key, value) in fields {
            if value.as_str() == Some(UNSET) {
                previous.remove(key);
            } else {
                previous.insert(key.clone(), value.clone());
            }
        }
        expanded.push(Value::Object(previous.clone()));
    }

    expanded
}

/// Whether a metadata document declares the minified format.
pub fn is_minified(document: &Value) -> bool {
    document.get("minified").and_then(Value::as_str) == Some(MINIFIED_FORMAT)
}
