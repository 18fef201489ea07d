//! Deterministic task fingerprints used as cache keys.
//!
//! A fingerprint is the SHA-256 hex digest of the task type and a canonical
//! rendering of its input payload. Object keys are sorted recursively before
//! hashing, so two payloads that differ only in key order fingerprint
//! identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::TaskType;

/// SHA-256 hex digest identifying a (task type, payload) pair.
pub type Fingerprint = String;

/// Compute the cache fingerprint for a task.
pub fn fingerprint(task_type: &TaskType, inputs: &Value) -> Fingerprint {
    let mut canonical = String::new();
    write_canonical(inputs, &mut canonical);
    let digest = Sha256::digest(format!("{}\n{}", task_type.as_str(), canonical).as_bytes());
    format!("{digest:x}")
}

/// Render a JSON value with recursively sorted object keys.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys and scalars go through serde_json for escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
