//! Strong type definitions for Tenderwatch.
//!
//! Identifiers and model names are newtypes so they cannot be mixed up with
//! arbitrary strings at API boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Length of a record id in hex characters (128 bits).
pub const RECORD_ID_LEN: usize = 32;

/// A record identifier: the first 32 lowercase hex characters of the
/// double SHA-256 of the canonical envelope.
///
/// Parsing only checks the shape; whether an id matches its envelope is
/// decided by the trust validator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Parse a record id, rejecting anything but 32 lowercase hex characters.
    pub fn parse(s: &str) -> Option<Self> {
        if is_record_id(s) {
            Some(Self(s.to_owned()))
        } else {
            None
        }
    }

    /// Wrap a lowercase hex digest produced by the content hash.
    pub(crate) fn from_digest_hex(hex: String) -> Self {
        debug_assert!(is_record_id(&hex));
        Self(hex)
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether `s` has the shape of a record id.
pub fn is_record_id(s: &str) -> bool {
    s.len() == RECORD_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if is_record_id(&s) {
            Ok(Self(s))
        } else {
            Err(format!("invalid record id {s:?}"))
        }
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// The recognized model kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Structured monitoring form, validated against a named schema.
    Form,
    /// Free comment, validated like a form.
    Comment,
    /// Administrative record (keys, schemas); owner must be `root`.
    Admin,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Form => "form",
            ModelKind::Comment => "comment",
            ModelKind::Admin => "admin",
        }
    }
}

/// A parsed `"<kind>/<name>"` model string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Model {
    pub kind: ModelKind,
    pub name: String,
}

impl Model {
    /// Model of keyring records.
    pub const ADMIN_PUBKEY: &'static str = "admin/pubkey";
    /// Model of schema records.
    pub const ADMIN_SCHEMA: &'static str = "admin/schema";
}

impl FromStr for Model {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValidationError::BadModelName(s.to_owned());
        let (kind, name) = s.split_once('/').ok_or_else(bad)?;
        if name.is_empty() {
            return Err(bad());
        }
        let kind = match kind {
            "form" => ModelKind::Form,
            "comment" => ModelKind::Comment,
            "admin" => ModelKind::Admin,
            _ => return Err(bad()),
        };
        Ok(Self {
            kind,
            name: name.to_owned(),
        })
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_shape() {
        assert!(RecordId::parse("c74f3008fdd2f7c5ae5446ab2e522629").is_some());
        assert!(RecordId::parse("C74F3008FDD2F7C5AE5446AB2E522629").is_none());
        assert!(RecordId::parse("c74f3008").is_none());
        assert!(RecordId::parse("z74f3008fdd2f7c5ae5446ab2e522629").is_none());
    }

    #[test]
    fn test_record_id_serde() {
        let id: RecordId = serde_json::from_str("\"c74f3008fdd2f7c5ae5446ab2e522629\"").unwrap();
        assert_eq!(id.as_str(), "c74f3008fdd2f7c5ae5446ab2e522629");
        assert!(serde_json::from_str::<RecordId>("\"nope\"").is_err());
    }

    #[test]
    fn test_model_parse() {
        let model: Model = "form/violation".parse().unwrap();
        assert_eq!(model.kind, ModelKind::Form);
        assert_eq!(model.name, "violation");
        assert_eq!(model.to_string(), "form/violation");

        let admin: Model = Model::ADMIN_PUBKEY.parse().unwrap();
        assert_eq!(admin.kind, ModelKind::Admin);

        assert!("blog/post".parse::<Model>().is_err());
        assert!("form".parse::<Model>().is_err());
        assert!("form/".parse::<Model>().is_err());
    }
}
