//! Reserved-key codec for the PostgreSQL backend.
//!
//! JSON Schema documents carry `$ref` and `$schema` keys, which the JSONB
//! path tooling treats specially. Schema records are rewritten to
//! `_ref`/`_schema` on the way in and restored on the way out. Keys that
//! already start with `_` gain one more `_` when stored, so a literal `_ref`
//! comes back as `_ref`. The mapping is applied only to `admin/schema`
//! documents.

use serde_json::{Map, Value};

use tenderwatch_core::Model;

use crate::document::Document;
use crate::error::Result;

/// Stored form ↔ wire form of reserved keys.
const RESERVED: &[(&str, &str)] = &[("$ref", "_ref"), ("$schema", "_schema")];

/// Whether a document is subject to key remapping.
pub fn applies_to(doc: &Document) -> bool {
    doc.model() == Some(Model::ADMIN_SCHEMA)
}

/// Rewrite reserved keys into their storage-safe form.
pub fn encode(doc: &Document) -> Result<Document> {
    if !applies_to(doc) {
        return Ok(doc.clone());
    }
    Document::from_value(remap(doc.to_value(), Direction::Encode))
}

/// Restore reserved keys from their storage-safe form.
pub fn decode(doc: Document) -> Result<Document> {
    if !applies_to(&doc) {
        return Ok(doc);
    }
    Document::from_value(remap(doc.into_value(), Direction::Decode))
}

#[derive(Clone, Copy)]
enum Direction {
    Encode,
    Decode,
}

const ESCAPE: char = '_';

fn rename(key: String, direction: Direction) -> String {
    match direction {
        Direction::Encode => {
            if key.starts_with(ESCAPE) {
                return format!("{ESCAPE}{key}");
            }
            match RESERVED.iter().find(|(wire, _)| key == *wire) {
                Some((_, stored)) => (*stored).to_owned(),
                None => key,
            }
        }
        Direction::Decode => {
            if key.starts_with("__") {
                return key[1..].to_owned();
            }
            match RESERVED.iter().find(|(_, stored)| key == *stored) {
                Some((wire, _)) => (*wire).to_owned(),
                None => key,
            }
        }
    }
}

fn remap(value: Value, direction: Direction) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(rename(k, direction), remap(v, direction));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| remap(v, direction)).collect()),
        other => other,
    }
}
