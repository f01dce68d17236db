//! Error types for the service.

use std::path::PathBuf;

use tenderwatch_core::{CoreError, ValidationError};
use tenderwatch_store::StoreError;
use tenderwatch_sync::{FeedError, SyncError};
use thiserror::Error;

/// Errors that can occur during service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The record was refused.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Tender feed error outside reference checks.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Crawler error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Malformed key material or record.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Writes are disabled.
    #[error("Method Not Allowed")]
    ReadOnly,

    /// A schema document or schema record could not be registered.
    #[error("schema error: {0}")]
    Schema(String),

    /// Configuration file missing, unreadable or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading a keyring or schema file failed.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record failed re-validation.
    #[error("record {id} failed verification: {source}")]
    Verify {
        id: String,
        #[source]
        source: Box<ServiceError>,
    },
}

impl ServiceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServiceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
