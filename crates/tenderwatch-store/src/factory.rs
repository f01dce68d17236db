//! Backend selection from configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StoreError};
use crate::memory::MemoryEngine;
use crate::postgres::{PostgresEngine, PostgresOptions};
use crate::sqlite::SqliteEngine;
use crate::traits::Engine;

/// The `[database]` section of the service configuration.
///
/// `engine` has no default: a configuration without it does not deserialize.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `memory`, `sqlite` or `postgres`.
    pub engine: String,
    /// Logical database name, used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// SQLite file; `None` opens an in-memory SQLite database.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// PostgreSQL connection URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Run the background ping for PostgreSQL.
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_secs: u64,
}

fn default_name() -> String {
    "tenderwatch".into()
}

fn default_keep_alive_interval() -> u64 {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "memory".into(),
            name: default_name(),
            path: None,
            url: None,
            keep_alive: false,
            keep_alive_interval_secs: default_keep_alive_interval(),
        }
    }
}

/// Open the configured backend and make sure its tables exist.
pub async fn open_engine(config: &DatabaseConfig) -> Result<Arc<dyn Engine>> {
    let engine: Arc<dyn Engine> = match config.engine.as_str() {
        "memory" => Arc::new(MemoryEngine::new()),
        "sqlite" => {
            let engine = match &config.path {
                Some(path) => SqliteEngine::open(path)?,
                None => SqliteEngine::open_memory()?,
            };
            Arc::new(engine)
        }
        "postgres" => {
            let url = config.url.clone().ok_or_else(|| {
                StoreError::BackendUnavailable("database.url is required for postgres".into())
            })?;
            let keep_alive = config
                .keep_alive
                .then(|| Duration::from_secs(config.keep_alive_interval_secs.max(1)));
            Arc::new(PostgresEngine::connect(PostgresOptions { url, keep_alive }).await?)
        }
        other => return Err(StoreError::UnknownEngine(other.to_owned())),
    };
    engine.init_schema(false).await?;
    tracing::info!(engine = engine.name(), database = %config.name, "storage ready");
    Ok(engine)
}
