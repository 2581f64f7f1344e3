use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::utils::retry::{NetworkErrorKinds, RetryError};

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("No snapshot found at '{}'", path.display())]
    NotFound { path: PathBuf },
    #[error("Malformed snapshot '{}' - {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error - {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot serialization error - {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Database error - {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Gauge '{name}' has non-finite value {value}, snapshot not saved")]
    NonFiniteGauge { name: String, value: f64 },
    #[error("Invalid database DSN '{0}'")]
    InvalidDsn(String),
    #[error("Max retries reached after {attempts} attempts - {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<DumpError>,
    },
}

impl DumpError {
    /// First run: nothing was ever saved, callers start empty.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DumpError::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        match self {
            DumpError::Io(err) => {
                matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) || NetworkErrorKinds::default().matches(err)
            }
            DumpError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<RetryError<DumpError>> for DumpError {
    fn from(err: RetryError<DumpError>) -> Self {
        match err {
            RetryError::Aborted(err) => err,
            RetryError::Exhausted { attempts, last } => DumpError::RetryExhausted {
                attempts,
                source: Box::new(last),
            },
        }
    }
}
