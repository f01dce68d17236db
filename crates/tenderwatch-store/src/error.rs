//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document with this id is already stored. Definitive, not retryable.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The stored document exists but carries a different model.
    #[error("model mismatch for {id}: expected {expected}, found {found}")]
    ModelMismatch {
        id: String,
        expected: String,
        found: String,
    },

    /// The backend could not be reached, even after reconnecting.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// `database.engine` names no known backend.
    #[error("unknown engine {0:?}")]
    UnknownEngine(String),

    /// Batch lookups are capped.
    #[error("too many ids: {0}")]
    TooManyIds(usize),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database error from PostgreSQL.
    #[error("database error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Document serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage or handed to the store.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The engine was used after `close()`.
    #[error("engine closed")]
    Closed,

    /// Internal failure (poisoned lock, lost blocking task).
    #[error("internal store error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
