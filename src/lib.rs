//! Metric storage and persistence engine of a small telemetry pipeline.
//!
//! Gauges overwrite, counters accumulate. The whole store is persisted as a
//! snapshot through a [`dumper::Dumper`], either on every update or from a
//! background [`storage::FlushActor`].
pub use crate::config::{compose_config, Backend, StorageConfig};
pub use crate::storage::{MetricStore, MetricsStorage, PersistenceMode, Snapshot, StorageError};

pub mod config;
pub mod dumper;
pub mod storage;
pub mod utils;
