use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use actix::{Actor, Addr};

use crate::config::StorageConfig;
use crate::dumper::{open_dumper, Dumper};
use crate::storage::error::StorageError;
use crate::storage::flush_actor::FlushActor;
use crate::storage::memory::MetricStore;
use crate::storage::snapshot::Snapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Every update saves the whole store before returning.
    Synchronous,
    /// A [`FlushActor`] saves the whole store on a fixed timer.
    Periodic(Duration),
}

impl PersistenceMode {
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            PersistenceMode::Synchronous
        } else {
            PersistenceMode::Periodic(interval)
        }
    }
}

/// Metric store bound to its durability backend.
///
/// This is what request handlers and poll loops talk to: reads hit memory,
/// updates hit memory and, in synchronous mode, the dumper.
pub struct MetricsStorage {
    store: Arc<MetricStore>,
    dumper: Option<Arc<dyn Dumper>>,
    mode: PersistenceMode,
    save_lock: Mutex<()>,
}

impl MetricsStorage {
    pub fn new(dumper: Option<Arc<dyn Dumper>>, mode: PersistenceMode) -> Self {
        Self {
            store: Arc::new(MetricStore::new()),
            dumper,
            mode,
            save_lock: Mutex::new(()),
        }
    }

    /// Opens the configured backend and, when enabled, restores the last
    /// snapshot before handing the storage out.
    pub fn from_config(cfg: &StorageConfig) -> Result<Self, StorageError> {
        let dumper = open_dumper(&cfg.backend(), cfg.retry()).map_err(StorageError::Open)?;
        let storage = Self::new(dumper, cfg.persistence_mode());
        if cfg.restore {
            storage.restore()?;
        }
        Ok(storage)
    }

    /// Seeds the store from the last saved snapshot, returning how many
    /// metrics were loaded. A missing snapshot means a first run and is not
    /// an error.
    pub fn restore(&self) -> Result<usize, StorageError> {
        let Some(dumper) = self.dumper.as_ref() else {
            return Ok(0);
        };
        match dumper.restore_data() {
            Ok(snapshot) => {
                let count = snapshot.len();
                self.store.restore(snapshot);
                log::info!("Restored {count} metrics");
                Ok(count)
            }
            Err(err) if err.is_not_found() => {
                log::info!("Skipping restore - {err}");
                Ok(0)
            }
            Err(err) => Err(StorageError::Restore(err)),
        }
    }

    /// NaN and infinities are rejected before reaching memory: no backend
    /// can persist them and a store holding one could never be saved again.
    pub fn gauge_update(&self, name: &str, value: f64) -> Result<(), StorageError> {
        if !value.is_finite() {
            return Err(StorageError::NonFiniteGauge {
                name: name.to_string(),
                value,
            });
        }
        self.store.gauge_update(name, value);
        self.write_through()
    }

    pub fn counter_update(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        self.store.counter_update(name, delta);
        self.write_through()
    }

    fn write_through(&self) -> Result<(), StorageError> {
        let dumper = match (self.mode, self.dumper.as_ref()) {
            (PersistenceMode::Synchronous, Some(dumper)) => dumper,
            _ => return Ok(()),
        };
        // snapshot under the lock so saves reach the dumper in update order
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        dumper
            .save_data(&self.store.snapshot())
            .map_err(StorageError::Persistence)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.store.gauge(name)
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.store.counter(name)
    }

    pub fn gauge_map(&self) -> HashMap<String, f64> {
        self.store.gauge_map()
    }

    pub fn counter_map(&self) -> HashMap<String, i64> {
        self.store.counter_map()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn mode(&self) -> PersistenceMode {
        self.mode
    }

    /// Liveness of the durability medium, always healthy without one.
    pub fn check_health(&self) -> bool {
        self.dumper
            .as_ref()
            .map(|dumper| dumper.check_health())
            .unwrap_or(true)
    }

    /// Starts the background flush loop; only periodic mode with a backend
    /// has one. Must be called from within an actix system.
    pub fn start_flushing(&self) -> Option<Addr<FlushActor>> {
        match (self.mode, self.dumper.as_ref()) {
            (PersistenceMode::Periodic(interval), Some(dumper)) => Some(
                FlushActor::new(self.store.clone(), dumper.clone(), interval).start(),
            ),
            _ => None,
        }
    }
}
