//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{Map, Value};

use tenderwatch_core::Keypair;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// A string of 32 lowercase hex characters.
pub fn record_id() -> impl Strategy<Value = String> {
    "[0-9a-f]{32}".prop_map(String::from)
}

/// Owner names, including non-ASCII ones.
pub fn owner() -> impl Strategy<Value = String> {
    prop_oneof!["[a-z][a-z0-9-]{0,15}", "[а-я]{1,8}"].prop_map(String::from)
}

/// `form/*`, `comment/*` or `admin/*` model names.
pub fn model() -> impl Strategy<Value = String> {
    (prop_oneof![Just("form"), Just("comment"), Just("admin")], "[a-z][a-z0-9]{0,11}")
        .prop_map(|(kind, name)| format!("{kind}/{name}"))
}

/// Server timestamps: positive, finite seconds since the epoch.
pub fn timestamp() -> impl Strategy<Value = f64> {
    (0.0f64..4_102_444_800.0).prop_filter("finite", |t| t.is_finite())
}

/// Arbitrary JSON up to `depth` levels of nesting.
pub fn json_value(depth: u32) -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "\\PC{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(depth, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("\\PC{0,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// An object payload.
pub fn payload() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-zA-Z]{1,8}", json_value(2), 0..6)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderwatch_core::{canonical_json, content_hash, is_record_id, Cursor};

    fn reorder(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.reverse();
                Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), reorder(v))).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(reorder).collect()),
            other => other.clone(),
        }
    }

    proptest! {
        #[test]
        fn test_canonical_ignores_key_order(value in json_value(3)) {
            prop_assert_eq!(canonical_json(&value), canonical_json(&reorder(&value)));
        }

        #[test]
        fn test_canonical_reparses_to_same_value(value in json_value(3)) {
            let bytes = canonical_json(&value);
            let back: Value = serde_json::from_slice(&bytes).unwrap();
            prop_assert_eq!(back, value);
        }

        #[test]
        fn test_hash_is_a_record_id(value in payload()) {
            let id = content_hash(&canonical_json(&value));
            prop_assert!(is_record_id(id.as_str()));
        }

        #[test]
        fn test_cursor_round_trip(ts in timestamp()) {
            let token = Cursor(ts).encode();
            prop_assert_eq!(token.len(), 16);
            prop_assert_eq!(Cursor::decode(&token).unwrap().ts(), ts);
        }

        #[test]
        fn test_generated_models_parse(m in model()) {
            prop_assert!(m.parse::<tenderwatch_core::Model>().is_ok());
        }
    }
}
