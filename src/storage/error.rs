use thiserror::Error;

use crate::dumper::DumpError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cannot open persistence backend - {0}")]
    Open(#[source] DumpError),
    #[error("Cannot restore metrics - {0}")]
    Restore(#[source] DumpError),
    #[error("Gauge '{name}' rejected, non-finite value {value}")]
    NonFiniteGauge { name: String, value: f64 },
    #[error("Cannot persist metrics - {0}")]
    Persistence(#[source] DumpError),
}
