//! Canonical JSON encoding for deterministic hashing and signing.
//!
//! The canonical form of a JSON value is:
//! - object keys sorted by code point, every key kept
//! - no insignificant whitespace (`,` and `:` separators)
//! - non-ASCII characters written literally as UTF-8
//! - `"` and `\` escaped, control characters escaped as `\b \f \n \r \t`
//!   or `\u00XX` with uppercase hex
//!
//! These bytes are both the content-hash input and the signed message, so
//! the encoding must be bit-exact across implementations.

use serde_json::Value;

use crate::record::Envelope;

/// Encode a JSON value to canonical bytes.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    write_value(&mut buf, value);
    buf
}

/// Encode an envelope to canonical bytes.
pub fn envelope_bytes(envelope: &Envelope) -> Vec<u8> {
    canonical_json(&envelope.to_value())
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Number(n) => buf.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(buf, s),
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(buf, item);
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            buf.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key);
                buf.push(b':');
                write_value(buf, item);
            }
            buf.push(b'}');
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    buf.push(b'"');
    for &b in s.as_bytes() {
        match b {
            b'"' => buf.extend_from_slice(b"\\\""),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            0x08 => buf.extend_from_slice(b"\\b"),
            0x0c => buf.extend_from_slice(b"\\f"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            0x00..=0x1f => {
                buf.extend_from_slice(b"\\u00");
                buf.push(HEX[(b >> 4) as usize]);
                buf.push(HEX[(b & 0x0f) as usize]);
            }
            // Multi-byte UTF-8 sequences pass through untouched.
            _ => buf.push(b),
        }
    }
    buf.push(b'"');
}
