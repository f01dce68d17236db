//! Golden vectors for record ids and cursor tokens.
//!
//! Ids and cursors are exchanged with other deployments and stored
//! clients; these values must never change.

use serde_json::json;

use tenderwatch::core::{canonical_json, content_hash, Cursor};
use tenderwatch::Record;
use tenderwatch_testkit::fixtures::Signer;
use tenderwatch_testkit::{cursor_vectors, hash_vectors};

#[test]
fn test_hash_vectors() {
    for vector in hash_vectors() {
        let envelope: serde_json::Value = serde_json::from_str(vector.envelope).unwrap();
        let id = content_hash(&canonical_json(&envelope));
        assert_eq!(id.as_str(), vector.expected_id, "{}", vector.name);
    }
}

#[test]
fn test_cursor_vectors() {
    for vector in cursor_vectors() {
        assert_eq!(Cursor(vector.ts).encode(), vector.token);
        let decoded: Cursor = vector.token.parse().unwrap();
        assert_eq!(decoded.ts(), vector.ts);
    }
}

#[test]
fn test_canonical_form() {
    let value = json!({"b": 1, "a": {"d": [1, 2], "c": "тест"}});
    assert_eq!(
        String::from_utf8(canonical_json(&value)).unwrap(),
        r#"{"a":{"c":"тест","d":[1,2]},"b":1}"#
    );
}

#[test]
fn test_signed_record_is_deterministic() {
    let signer = Signer::new("example-owner", [7; 32]);
    let envelope = json!({
        "model": "comment/comment",
        "owner": "example-owner",
        "date": "2017-04-20T01:55:21.358240+03:00",
        "payload": {"comment": "ok"},
    });
    let first = signer.sign_envelope(envelope.clone());
    let second = signer.sign_envelope(envelope);
    assert_eq!(first, second);

    let record = Record::from_value(first).unwrap();
    assert_eq!(record.owner(), "example-owner");
    assert_eq!(record.id.as_str().len(), 32);
}
