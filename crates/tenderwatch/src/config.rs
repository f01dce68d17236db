//! Service configuration, read from a TOML file.
//!
//! ```toml
//! readonly = false
//! bind_addr = "127.0.0.1:8400"
//! keyring = "private/keyring"
//! schemas = "private/schemas"
//!
//! [database]
//! engine = "sqlite"
//! path = "tenderwatch.db"
//!
//! [tenders]
//! url = "https://public.api.openprocurement.org/api/2.4/tenders"
//!
//! [sync]
//! query_limit = 2000
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use tenderwatch_store::DatabaseConfig;
use tenderwatch_sync::{ClientConfig, CrawlerConfig};

use crate::error::{Result, ServiceError};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Refuse every write with 405.
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Directory of trusted `admin/pubkey` records.
    #[serde(default)]
    pub keyring: Option<PathBuf>,
    /// Directory of trusted schemas.
    #[serde(default)]
    pub schemas: Option<PathBuf>,
    /// Primary tender feed.
    #[serde(default)]
    pub tenders: Option<ClientConfig>,
    /// Fallback feed for tenders the primary one does not know.
    #[serde(default)]
    pub archive: Option<ClientConfig>,
    #[serde(default)]
    pub sync: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8400))
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ServiceError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.retry.validate()?;
        Ok(config)
    }
}

/// Retry schedule for tender lookups: attempt `n` (from 0) that fails
/// transiently is followed by a sleep of `(n + 1) * backoff_step`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_step_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_step_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            backoff_step_ms: 0,
        }
    }

    /// A lookup must be tried at least once.
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(ServiceError::Config(
                "retry.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(u64::from(attempt) + 1))
    }
}
