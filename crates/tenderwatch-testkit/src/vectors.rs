//! Golden vectors.
//!
//! Fixed inputs with known outputs. Any change to canonical JSON, the
//! content hash or the cursor codec shows up here first.

use serde_json::Value;

use tenderwatch_core::{canonical_json, content_hash, Cursor};

/// An envelope and the id it must hash to.
#[derive(Debug, Clone)]
pub struct HashVector {
    pub name: &'static str,
    /// Envelope as JSON text; key order is irrelevant.
    pub envelope: &'static str,
    pub expected_id: &'static str,
}

/// A timestamp and its cursor token.
#[derive(Debug, Clone)]
pub struct CursorVector {
    pub ts: f64,
    pub token: &'static str,
}

pub fn hash_vectors() -> Vec<HashVector> {
    vec![
        HashVector {
            name: "empty envelope",
            envelope: "{}",
            expected_id: "c74f3008fdd2f7c5ae5446ab2e522629",
        },
        HashVector {
            name: "owner only",
            envelope: r#"{"owner": "example-owner"}"#,
            expected_id: "f78e26a9166e7812987f9aec721ba2a2",
        },
        HashVector {
            name: "unicode payload",
            envelope: r#"{"payload": "тест", "owner": "example-owner", "date": "2017-04-20T01:55:21.358240+03:00"}"#,
            expected_id: "061002ffb700a3d7cad59da4457c3af0",
        },
    ]
}

pub fn cursor_vectors() -> Vec<CursorVector> {
    vec![
        CursorVector {
            ts: 1.0,
            token: "000000000000f03f",
        },
        CursorVector {
            ts: 1_500_000_000.25,
            token: "000010c00b5ad641",
        },
    ]
}

/// Id computed for a hash vector.
pub fn compute_id(vector: &HashVector) -> String {
    let envelope: Value = serde_json::from_str(vector.envelope)
        .unwrap_or_else(|e| panic!("vector {:?} is not JSON: {e}", vector.name));
    content_hash(&canonical_json(&envelope)).to_string()
}

/// `(name, matches, computed)` for every hash vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    hash_vectors()
        .iter()
        .map(|v| {
            let id = compute_id(v);
            (v.name.to_string(), id == v.expected_id, id)
        })
        .collect()
}

/// Token computed for a cursor vector.
pub fn encode_cursor(vector: &CursorVector) -> String {
    Cursor(vector.ts).encode()
}
