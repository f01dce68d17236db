//! Stored documents, tables, and list pages.

use serde_json::{Map, Value};
use std::fmt;

use tenderwatch_core::Cursor;

use crate::error::{Result, StoreError};

/// Maximum ids accepted by a batch lookup.
pub const MAX_BATCH_IDS: usize = 100;

/// Default page size for [`ListQuery`].
pub const DEFAULT_LIMIT: usize = 100;

/// The logical tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Content-addressed records.
    Data,
    /// Mirror of the external tender feed.
    Tenders,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::Data, Table::Tenders];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Data => "data",
            Table::Tenders => "tenders",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON object with a string `id`, as kept by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Wrap a JSON value, requiring an object with a non-empty string `id`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let ok = map
                    .get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| !id.is_empty());
                if ok {
                    Ok(Self(map))
                } else {
                    Err(StoreError::InvalidData("document has no id".into()))
                }
            }
            _ => Err(StoreError::InvalidData("document is not an object".into())),
        }
    }

    pub fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    /// `envelope.model`, for record documents.
    pub fn model(&self) -> Option<&str> {
        self.0
            .get("envelope")
            .and_then(|e| e.get("model"))
            .and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Whether a stored model satisfies an expected reference kind.
///
/// `expected` may name the full model (`form/violation`), its kind (`form`)
/// or its name (`violation`).
pub fn model_matches(stored: &str, expected: &str) -> bool {
    if stored == expected {
        return true;
    }
    match stored.split_once('/') {
        Some((kind, name)) => kind == expected || name == expected,
        None => false,
    }
}

/// Check an optional expected model against the model found in storage.
pub(crate) fn check_model(id: &str, found: Option<&str>, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match found {
        Some(found) if model_matches(found, expected) => Ok(()),
        found => Err(StoreError::ModelMismatch {
            id: id.to_owned(),
            expected: expected.to_owned(),
            found: found.unwrap_or_default().to_owned(),
        }),
    }
}

/// Parameters of a list call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListQuery {
    /// Open boundary; `None` starts at the beginning (or end, if reversed).
    pub cursor: Option<Cursor>,
    pub limit: usize,
    pub reverse: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_LIMIT,
            reverse: false,
        }
    }
}

impl ListQuery {
    pub fn after(cursor: Option<Cursor>, limit: usize) -> Self {
        Self {
            cursor,
            limit,
            reverse: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Whether `ts` lies strictly past the cursor in the query direction.
    pub fn admits(&self, ts: f64) -> bool {
        match self.cursor {
            None => true,
            Some(c) if self.reverse => ts < c.ts(),
            Some(c) => ts > c.ts(),
        }
    }
}

/// One page of ids ordered by `ts`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub ids: Vec<String>,
    /// `ts` of the first item returned.
    pub prev: Option<Cursor>,
    /// `ts` of the last item returned.
    pub next: Option<Cursor>,
}

impl ListPage {
    /// Build a page from `(id, ts)` rows already in list order.
    pub fn from_rows(rows: Vec<(String, f64)>) -> Self {
        let prev = rows.first().map(|(_, ts)| Cursor(*ts));
        let next = rows.last().map(|(_, ts)| Cursor(*ts));
        Self {
            ids: rows.into_iter().map(|(id, _)| id).collect(),
            prev,
            next,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
