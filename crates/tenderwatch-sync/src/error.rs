//! Error types for the sync module.

use thiserror::Error;

/// Failure of a single call against the tender feed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The feed answered with a non-success HTTP status.
    #[error("feed returned status {0}")]
    Status(u16),

    /// Connection, DNS, TLS or timeout failure.
    #[error("feed transport error: {0}")]
    Transport(String),

    /// The response body was not the expected JSON shape.
    #[error("feed response not understood: {0}")]
    Decode(String),

    /// The client was used after `close()`.
    #[error("feed client closed")]
    Closed,
}

impl FeedError {
    /// 4xx: the request itself is wrong; retrying the same client won't help.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FeedError::Status(code) if (400..500).contains(code))
    }
}

/// Errors that end a crawler run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Feed request failed.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] tenderwatch_store::StoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(FeedError::Status(404).is_client_error());
        assert!(FeedError::Status(410).is_client_error());
        assert!(!FeedError::Status(503).is_client_error());
        assert!(!FeedError::Transport("reset".into()).is_client_error());
    }
}
