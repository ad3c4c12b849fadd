//! Deterministic cache-key derivation.
//!
//! Keys take the form `site:{id}|op:{name}|p:{digest}` where the digest is a
//! canonical rendering of the parameter map: keys sorted, scalars serialized
//! stably, and long or nested values collapsed to a SHA-256 prefix. Short
//! scalar parameters stay literal so invalidation patterns can target them.

// std
use std::collections::BTreeMap;
// crates.io
use serde_json::{Map as JsonMap, Value};
use sha2::{Digest, Sha256};

/// Values longer than this are replaced by a digest in the key.
const LITERAL_VALUE_MAX: usize = 48;

/// Derive the cache key for an operation invocation.
pub fn cache_key(site_id: &str, op_name: &str, params: &JsonMap<String, Value>) -> String {
    format!("site:{site_id}|op:{op_name}|p:{}", param_digest(params))
}

/// Canonical rendering of a parameter map, independent of insertion order.
pub fn param_digest(params: &JsonMap<String, Value>) -> String {
    if params.is_empty() {
        return "-".into();
    }

    let sorted: BTreeMap<&str, &Value> = params
        .iter()
        .map(|(name, value)| (name.as_str(), value))
        .collect();

    sorted
        .into_iter()
        .map(|(name, value)| format!("{name}={}", canonical_value(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_value(value: &Value) -> String {
    let rendered = match value {
        Value::Null => "null".to_owned(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(canonical_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(map) => {
            let sorted: BTreeMap<&str, &Value> = map
                .iter()
                .map(|(name, value)| (name.as_str(), value))
                .collect();

            sorted
                .into_iter()
                .map(|(name, value)| format!("{name}:{}", canonical_value(value)))
                .collect::<Vec<_>>()
                .join(",")
        }
    };

    if rendered.len() > LITERAL_VALUE_MAX || rendered.contains(['&', '|', '=']) {
        let digest = Sha256::digest(rendered.as_bytes());

        format!("sha256:{}", hex_prefix(&digest, 16))
    } else {
        rendered
    }
}

fn hex_prefix(bytes: &[u8], length: usize) -> String {
    bytes
        .iter()
        .take(length)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
