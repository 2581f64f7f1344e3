//! Durability backends moving whole-store snapshots to and from a medium.
use std::sync::Arc;

use crate::config::Backend;
use crate::storage::snapshot::Snapshot;
use crate::utils::retry::Retry;

pub mod db;
pub mod error;
pub mod file;
pub mod retrying;

pub use db::DbDumper;
pub use error::DumpError;
pub use file::FileDumper;
pub use retrying::RetryingDumper;

pub trait Dumper: Send + Sync {
    /// Persists the full snapshot. On failure the previously saved snapshot
    /// must still be readable.
    ///
    /// Both backends reject NaN and infinite gauges with
    /// [`DumpError::NonFiniteGauge`] before touching the medium.
    fn save_data(&self, snapshot: &Snapshot) -> Result<(), DumpError>;

    /// Loads the last saved snapshot, [`DumpError::NotFound`] when none exists.
    fn restore_data(&self) -> Result<Snapshot, DumpError>;

    fn check_health(&self) -> bool;
}

impl<D: Dumper + ?Sized> Dumper for Arc<D> {
    fn save_data(&self, snapshot: &Snapshot) -> Result<(), DumpError> {
        (**self).save_data(snapshot)
    }

    fn restore_data(&self) -> Result<Snapshot, DumpError> {
        (**self).restore_data()
    }

    fn check_health(&self) -> bool {
        (**self).check_health()
    }
}

fn ensure_persistable(snapshot: &Snapshot) -> Result<(), DumpError> {
    match snapshot.non_finite_gauge() {
        Some((name, value)) => Err(DumpError::NonFiniteGauge {
            name: name.to_string(),
            value,
        }),
        None => Ok(()),
    }
}

/// Builds the configured backend, wrapped with the retry policy.
///
/// Returns `None` for the memory backend: nothing gets persisted.
pub fn open_dumper(backend: &Backend, retry: Retry) -> Result<Option<Arc<dyn Dumper>>, DumpError> {
    let dumper: Arc<dyn Dumper> = match backend {
        Backend::Database(dsn) => {
            let db = retry.run(&DumpError::is_transient, || DbDumper::open(dsn))?;
            log::info!("Persisting metrics to database");
            Arc::new(RetryingDumper::new(db, retry))
        }
        Backend::File(path) => {
            log::info!("Persisting metrics to '{}'", path.display());
            Arc::new(RetryingDumper::new(FileDumper::new(path.clone()), retry))
        }
        Backend::Memory => {
            log::warn!("No persistence backend configured, metrics are kept in memory only");
            return Ok(None);
        }
    };
    Ok(Some(dumper))
}

#[cfg(test)]
mod test {
    use crate::config::Backend;
    use crate::dumper::{open_dumper, DumpError};
    use crate::storage::snapshot::Snapshot;
    use crate::utils::retry::Retry;

    #[test]
    fn test_memory_backend_has_no_dumper() {
        assert!(open_dumper(&Backend::Memory, Retry::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_dsn_is_not_retried() {
        let out = open_dumper(&Backend::Database("sqlite://".to_string()), Retry::default());
        assert!(matches!(out, Err(DumpError::InvalidDsn(_))));
    }

    #[test]
    fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::File(dir.path().join("metrics-db.json"));
        let dumper = open_dumper(&backend, Retry::new(vec![])).unwrap().unwrap();

        let mut snapshot = Snapshot::default();
        snapshot.counters.insert("PollCount".to_string(), 5);
        dumper.save_data(&snapshot).unwrap();

        assert_eq!(dumper.restore_data().unwrap(), snapshot);
    }
}
