pub mod error;
pub mod flush_actor;
pub mod memory;
pub mod persistent;
pub mod snapshot;

pub use error::StorageError;
pub use flush_actor::{FlushActor, FlushNow, FlushOutcome, StopFlushing};
pub use memory::MetricStore;
pub use persistent::{MetricsStorage, PersistenceMode};
pub use snapshot::Snapshot;
