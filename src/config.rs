use std::path::PathBuf;
use std::time::Duration;

use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::storage::PersistenceMode;
use crate::utils::retry::Retry;

/// Storage settings, defaults match the server's historical flags.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Seconds between flushes, `0` saves on every update.
    pub store_interval: u64,
    /// Snapshot document path, empty disables file persistence.
    pub file_storage_path: String,
    /// Takes precedence over the file backend when set.
    pub database_dsn: Option<String>,
    pub restore: bool,
    /// Waits in seconds between attempts against the backend.
    pub retry_intervals: Vec<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_interval: 300,
            file_storage_path: "/tmp/metrics-db.json".to_string(),
            database_dsn: None,
            restore: true,
            retry_intervals: vec![1, 3, 5],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    Database(String),
    File(PathBuf),
    Memory,
}

impl StorageConfig {
    pub fn backend(&self) -> Backend {
        match self.database_dsn.as_deref().map(str::trim) {
            Some(dsn) if !dsn.is_empty() => Backend::Database(dsn.to_string()),
            _ if !self.file_storage_path.is_empty() => {
                Backend::File(PathBuf::from(&self.file_storage_path))
            }
            _ => Backend::Memory,
        }
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        PersistenceMode::from_interval(Duration::from_secs(self.store_interval))
    }

    pub fn retry(&self) -> Retry {
        Retry::from_secs(&self.retry_intervals)
    }
}

/// Layers an optional configuration file and then the process environment
/// (`STORE_INTERVAL`, `FILE_STORAGE_PATH`, `DATABASE_DSN`, `RESTORE`,
/// `RETRY_INTERVALS` as a comma separated list).
pub fn compose_config(external_path: &str) -> Result<StorageConfig, ConfigError> {
    Config::builder()
        .add_source(File::with_name(external_path).required(false))
        .add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("retry_intervals"),
        )
        .build()?
        .try_deserialize()
}
