use super::{DumpError, Dumper};
use crate::storage::snapshot::Snapshot;
use crate::utils::retry::Retry;

/// Runs every save and restore of the wrapped dumper under a retry policy,
/// retrying only errors classified as transient.
pub struct RetryingDumper<D> {
    inner: D,
    retry: Retry,
}

impl<D: Dumper> RetryingDumper<D> {
    pub fn new(inner: D, retry: Retry) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: Dumper> Dumper for RetryingDumper<D> {
    fn save_data(&self, snapshot: &Snapshot) -> Result<(), DumpError> {
        self.retry
            .run(&DumpError::is_transient, || self.inner.save_data(snapshot))
            .map_err(DumpError::from)
    }

    fn restore_data(&self) -> Result<Snapshot, DumpError> {
        self.retry
            .run(&DumpError::is_transient, || self.inner.restore_data())
            .map_err(DumpError::from)
    }

    fn check_health(&self) -> bool {
        self.inner.check_health()
    }
}
