//! Deterministic canonical serialization for signing.
//!
//! Two independently-produced JSON documents with the same field/value
//! pairs must sign identically, regardless of the key order a sender's
//! serializer happened to emit. The canonical form is the exclusive input
//! to signing and verification; the original wire bytes are never signed.
//!
//! Rules:
//! 1. a top-level `signature` field is removed before serializing;
//! 2. object keys are sorted lexicographically at every nesting level;
//! 3. array element order is preserved verbatim (arrays are ordered data);
//! 4. no insignificant whitespace;
//! 5. string escaping is identical to `serde_json`'s, UTF-8 throughout.

use crate::error::{AgoraError, AgoraResult};
use serde_json::Value;

/// Field name excluded from the canonical form at the top level.
pub const SIGNATURE_FIELD: &str = "signature";

/// Produce the canonical string form of a JSON value.
pub fn canonical_json(value: &Value) -> AgoraResult<String> {
    let mut out = String::new();
    match value {
        Value::Object(map) => write_object(&mut out, map, true)?,
        other => write_value(&mut out, other)?,
    }
    Ok(out)
}

/// Canonical form as bytes, ready for signing.
pub fn canonical_bytes(value: &Value) -> AgoraResult<Vec<u8>> {
    canonical_json(value).map(String::into_bytes)
}

fn write_object(
    out: &mut String,
    map: &serde_json::Map<String, Value>,
    strip_signature: bool,
) -> AgoraResult<()> {
    let mut keys: Vec<&String> = map
        .keys()
        .filter(|k| !(strip_signature && k.as_str() == SIGNATURE_FIELD))
        .collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key)?;
        out.push(':');
        write_value(out, &map[key.as_str()])?;
    }
    out.push('}');
    Ok(())
}

fn write_value(out: &mut String, value: &Value) -> AgoraResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        // The signature field is only stripped at depth 0; nested objects
        // keep all their keys.
        Value::Object(map) => write_object(out, map, false)?,
    }
    Ok(())
}

fn write_string(out: &mut String, s: &str) -> AgoraResult<()> {
    let encoded =
        serde_json::to_string(s).map_err(|e| AgoraError::Serialization(e.to_string()))?;
    out.push_str(&encoded);
    Ok(())
}
