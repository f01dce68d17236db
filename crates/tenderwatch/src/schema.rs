//! Schema registry.
//!
//! Maps a schema name (the `<name>` of a `form/<name>` or `comment/<name>`
//! model) to its JSON Schema document. A schema without a `definitions`
//! block resolves `#/definitions/...` against the definitions of the base
//! `comment` schema; a schema with its own block sees only that block.

use std::collections::HashMap;

use serde_json::{Map, Value};

use tenderwatch_core::{Envelope, Model, ModelKind, Record, ValidationError};

use crate::error::{Result, ServiceError};
use crate::json_schema;

/// Name of the schema whose definitions every other schema inherits.
pub const BASE_SCHEMA: &str = "comment";

/// Name → JSON Schema document.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Value>,
    /// `definitions` of the current base schema.
    base_definitions: Map<String, Value>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` under `name`, replacing an earlier version.
    pub fn insert(&mut self, name: &str, schema: Value) -> Result<()> {
        if !schema.is_object() {
            return Err(ServiceError::Schema(format!("schema {name:?} is not an object")));
        }
        if name == BASE_SCHEMA {
            self.base_definitions = match schema.get("definitions") {
                Some(Value::Object(defs)) => defs.clone(),
                _ => Map::new(),
            };
        }
        if self.schemas.insert(name.to_owned(), schema).is_some() {
            tracing::debug!(schema = name, "schema replaced");
        }
        Ok(())
    }

    /// Register the schema carried by an `admin/schema` record.
    ///
    /// The payload is `{model: "<kind>/<name>", schema: {...}}`; a bare
    /// `model` is taken as the name.
    pub fn insert_record(&mut self, record: &Record) -> Result<()> {
        if record.model() != Model::ADMIN_SCHEMA {
            return Err(ServiceError::Schema(format!("{} is not a schema record", record.id)));
        }
        let (name, schema) = schema_payload(&record.envelope.payload)
            .ok_or_else(|| ServiceError::Schema(format!("{} has no model/schema", record.id)))?;
        self.insert(&name, schema.clone())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validate `payload` against schema `name`; returns the schema used.
    pub fn validate(&self, name: &str, payload: &Value) -> std::result::Result<&Value, ValidationError> {
        let schema = self
            .schemas
            .get(name)
            .ok_or_else(|| ValidationError::UnknownSchema(name.to_owned()))?;
        let inherited = match schema.get("definitions") {
            Some(_) => None,
            None => Some(&self.base_definitions),
        };
        json_schema::validate(payload, schema, inherited)
            .map_err(|e| ValidationError::SchemaViolation(e.to_string()))?;
        Ok(schema)
    }

    /// Model-level checks that need no I/O.
    ///
    /// `admin` records require owner `root` and are not schema-checked; `form`
    /// and `comment` payloads must satisfy the schema named by the model.
    /// Returns the schema for further reference checks, `None` for admin.
    pub fn check_envelope(
        &self,
        envelope: &Envelope,
    ) -> std::result::Result<Option<&Value>, ValidationError> {
        let model = envelope.parsed_model()?;
        match model.kind {
            ModelKind::Admin => {
                if envelope.owner != "root" {
                    return Err(ValidationError::AdminRequiresRoot);
                }
                Ok(None)
            }
            ModelKind::Form | ModelKind::Comment => {
                self.validate(&model.name, &envelope.payload).map(Some)
            }
        }
    }
}

/// `(name, schema)` of an `admin/schema` payload.
pub(crate) fn schema_payload(payload: &Value) -> Option<(String, &Value)> {
    let model = payload.get("model").and_then(Value::as_str)?;
    let name = match model.split_once('/') {
        Some((_, name)) => name,
        None => model,
    };
    let schema = payload.get("schema").filter(|s| s.is_object())?;
    (!name.is_empty()).then(|| (name.to_owned(), schema))
}
