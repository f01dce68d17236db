//! Loading trusted keys and schemas from disk.
//!
//! Both directories hold `*.json` files read in file-name order. A keyring
//! file is an `admin/pubkey` record. A schema file is either a raw JSON
//! Schema, registered under the file stem, or a full `admin/schema` record.

use std::path::{Path, PathBuf};

use serde_json::Value;

use tenderwatch_core::{Keyring, Model, Record};

use crate::error::{Result, ServiceError};
use crate::schema::SchemaRegistry;
use crate::service::Snapshot;

/// Build the seed snapshot from the configured directories.
pub fn load_seed(keyring: Option<&Path>, schemas: Option<&Path>) -> Result<Snapshot> {
    let mut seed = Snapshot::default();
    if let Some(dir) = keyring {
        seed.keyring = load_keyring(dir)?;
    }
    if let Some(dir) = schemas {
        seed.schemas = load_schemas(dir)?;
    }
    Ok(seed)
}

pub fn load_keyring(dir: &Path) -> Result<Keyring> {
    let mut keyring = Keyring::new();
    for path in json_files(dir)? {
        let record = read_record(&path)?;
        keyring.insert_record(&record)?;
        tracing::debug!(path = %path.display(), owner = record.owner(), "key loaded");
    }
    tracing::info!(owners = keyring.len(), keys = keyring.key_count(), "keyring loaded");
    Ok(keyring)
}

pub fn load_schemas(dir: &Path) -> Result<SchemaRegistry> {
    let mut schemas = SchemaRegistry::new();
    for path in json_files(dir)? {
        let value = read_json(&path)?;
        if value.get("envelope").is_some() {
            let record = Record::from_value(value)?;
            if record.model() != Model::ADMIN_SCHEMA {
                return Err(ServiceError::Schema(format!(
                    "{}: expected an admin/schema record",
                    path.display()
                )));
            }
            schemas.insert_record(&record)?;
        } else {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| ServiceError::Schema(format!("{}: bad file name", path.display())))?;
            schemas.insert(name, value)?;
        }
    }
    tracing::info!(schemas = schemas.len(), "schemas loaded");
    Ok(schemas)
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ServiceError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ServiceError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| ServiceError::io(path, e))?;
    serde_json::from_str(&text)
        .map_err(|e| ServiceError::Schema(format!("{}: {e}", path.display())))
}

/// Read a record file, such as the root key given to `init`.
pub fn read_record(path: &Path) -> Result<Record> {
    Ok(Record::from_value(read_json(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tenderwatch_core::Keypair;

    fn write(dir: &Path, name: &str, value: &Value) {
        std::fs::write(dir.join(name), serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }

    fn key_record(owner: &str) -> Value {
        json!({
            "id": "0".repeat(32),
            "sign": "",
            "envelope": {
                "model": "admin/pubkey",
                "owner": "root",
                "date": "2020-01-01T00:00:00Z",
                "payload": {
                    "owner": owner,
                    "publicKey": Keypair::generate().public_key().to_hex(),
                    "validSince": "2000-01-01T00:00:00Z",
                    "validTill": "2100-01-01T00:00:00Z"
                }
            }
        })
    }

    #[test]
    fn test_load_keyring_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "root.json", &key_record("root"));
        write(dir.path(), "bob.json", &key_record("bob"));
        std::fs::write(dir.path().join("README"), "not a key").unwrap();

        let keyring = load_keyring(dir.path()).unwrap();
        assert!(keyring.knows("root"));
        assert!(keyring.knows("bob"));
        assert_eq!(keyring.key_count(), 2);
    }

    #[test]
    fn test_load_schema_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "comment.json",
            &json!({"definitions": {"id": {"type": "string"}}, "type": "object"}),
        );
        write(
            dir.path(),
            "form113.json",
            &json!({
                "id": "1".repeat(32),
                "sign": "",
                "envelope": {
                    "model": "admin/schema",
                    "owner": "root",
                    "date": "2020-01-01T00:00:00Z",
                    "payload": {"model": "form/tender113", "schema": {"type": "object"}}
                }
            }),
        );

        let schemas = load_schemas(dir.path()).unwrap();
        assert!(schemas.contains("comment"));
        assert!(schemas.contains("tender113"));
        assert!(!schemas.contains("form113"));
    }

    #[test]
    fn test_wrong_record_kind_in_schema_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "key.json", &key_record("root"));
        assert!(matches!(load_schemas(dir.path()), Err(ServiceError::Schema(_))));
    }

    #[test]
    fn test_missing_dir() {
        let err = load_seed(Some(Path::new("/nonexistent/keyring")), None).unwrap_err();
        assert!(matches!(err, ServiceError::Io { .. }));
    }
}
