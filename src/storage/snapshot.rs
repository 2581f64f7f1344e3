use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Point-in-time copy of every gauge and counter, the unit of persistence.
///
/// Field names match the snapshot documents written by earlier releases, so
/// existing dump files keep restoring.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "CounterData", default)]
    pub counters: HashMap<String, i64>,
    #[serde(rename = "GaugeData", default)]
    pub gauges: HashMap<String, f64>,
}

impl Snapshot {
    pub fn new(gauges: HashMap<String, f64>, counters: HashMap<String, i64>) -> Self {
        Self { counters, gauges }
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// First gauge holding NaN or an infinity, values neither JSON nor the
    /// database schema can represent.
    pub fn non_finite_gauge(&self) -> Option<(&str, f64)> {
        self.gauges
            .iter()
            .find(|(_, value)| !value.is_finite())
            .map(|(name, value)| (name.as_str(), *value))
    }
}
