use std::collections::HashMap;

use dashmap::DashMap;

use crate::storage::snapshot::Snapshot;

/// Concurrent in-memory metric store.
///
/// Gauges and counters live in separate namespaces: the same name can exist in
/// both without interference. All operations go through the internal shard
/// locks of [`DashMap`], callers never lock anything themselves.
#[derive(Debug, Default)]
pub struct MetricStore {
    gauges: DashMap<String, f64>,
    counters: DashMap<String, i64>,
}

impl MetricStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn gauge_update(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }

    /// Adds `delta` to the counter, starting from zero when absent.
    ///
    /// The read-modify-write runs under the entry's shard lock, so concurrent
    /// increments of the same name are never lost.
    pub fn counter_update(&self, name: &str, delta: i64) {
        self.counters
            .entry(name.to_string())
            .and_modify(|value| *value = value.wrapping_add(delta))
            .or_insert(delta);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|value| *value)
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).map(|value| *value)
    }

    pub fn gauge_map(&self) -> HashMap<String, f64> {
        self.gauges
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn counter_map(&self) -> HashMap<String, i64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.gauge_map(), self.counter_map())
    }

    /// Seeds the store from a persisted snapshot.
    ///
    /// Counter totals become the new baseline, they are not added as deltas.
    pub fn restore(&self, snapshot: Snapshot) {
        let Snapshot { gauges, counters } = snapshot;
        for (name, value) in gauges {
            self.gauges.insert(name, value);
        }
        for (name, value) in counters {
            self.counters.insert(name, value);
        }
    }
}
