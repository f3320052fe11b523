use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

use crate::parser::ParseError;

/// Flow (L/min) above which a sensor counts as active. Exactly 0.5 is inactive.
pub const ACTIVE_THRESHOLD: f64 = 0.5;

/// One `(sensorId, flowRate)` pair, from the live feed or the fallback generator.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    sensor_id: String,
    flow_rate: f64,
}

impl SensorReading {
    /// Builds a reading, rejecting empty ids and negative or non-finite flow.
    pub fn new(sensor_id: impl Into<String>, flow_rate: f64) -> Result<Self, ParseError> {
        let sensor_id = sensor_id.into();
        if sensor_id.is_empty() {
            return Err(ParseError::EmptySensorId);
        }
        if !flow_rate.is_finite() || flow_rate < 0.0 {
            return Err(ParseError::InvalidFlowRate(flow_rate));
        }
        Ok(Self { sensor_id, flow_rate })
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn flow_rate(&self) -> f64 {
        self.flow_rate
    }
}

/// Where a reading came from. The store accepts one source at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    Live,
    Simulated,
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Live => f.write_str("live"),
            FeedSource::Simulated => f.write_str("simulated"),
        }
    }
}

/// Stored state of one known sensor.
///
/// `active` is private and only recomputed from `flow_rate` inside
/// [`SensorRecord::apply`], so it never goes stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecord {
    id: String,
    flow_rate: f64,
    active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    last_update: Option<OffsetDateTime>,
}

impl SensorRecord {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flow_rate: 0.0,
            active: false,
            last_update: None,
        }
    }

    /// Writes a new flow value stamped at `now`. The stored timestamp never
    /// moves backwards, even if the wall clock does.
    pub(crate) fn apply(&mut self, flow_rate: f64, now: OffsetDateTime) {
        self.flow_rate = flow_rate;
        self.active = flow_rate > ACTIVE_THRESHOLD;
        self.last_update = Some(match self.last_update {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flow_rate(&self) -> f64 {
        self.flow_rate
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn last_update(&self) -> Option<OffsetDateTime> {
        self.last_update
    }
}

/// Ingestion counters, reported with every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub applied: u64,
    pub malformed: u64,
    pub unknown_sensor: u64,
    pub superseded: u64,
}

/// Owned copy of the store, consistent as of the moment it was taken.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub records: Vec<SensorRecord>,
    pub source: FeedSource,
    pub stats: IngestStats,
    #[serde(with = "time::serde::rfc3339")]
    pub taken_at: OffsetDateTime,
}

impl StoreSnapshot {
    pub fn get(&self, id: &str) -> Option<&SensorRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.active).count()
    }
}

pub type SensorsMap = BTreeMap<String, SensorRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn reading_rejects_empty_id_and_bad_flow() {
        assert!(SensorReading::new("", 1.0).is_err());
        assert!(SensorReading::new("S001", -0.1).is_err());
        assert!(SensorReading::new("S001", f64::NAN).is_err());
        assert!(SensorReading::new("S001", f64::INFINITY).is_err());
        let r = SensorReading::new("S001", 0.0).unwrap();
        assert_eq!(r.sensor_id(), "S001");
        assert_eq!(r.flow_rate(), 0.0);
    }

    #[test]
    fn active_follows_threshold() {
        let mut rec = SensorRecord::new("S001");
        let now = datetime!(2024-05-01 10:00 UTC);

        rec.apply(0.5, now);
        assert!(!rec.active());
        rec.apply(0.50001, now);
        assert!(rec.active());
        rec.apply(0.0, now);
        assert!(!rec.active());
    }

    #[test]
    fn last_update_never_goes_backwards() {
        let mut rec = SensorRecord::new("S001");
        let later = datetime!(2024-05-01 10:00:05 UTC);
        let earlier = datetime!(2024-05-01 10:00:00 UTC);

        rec.apply(3.0, later);
        rec.apply(4.0, earlier);
        assert_eq!(rec.last_update(), Some(later));
        assert_eq!(rec.flow_rate(), 4.0);
    }

    #[test]
    fn record_serializes_camel_case() {
        let mut rec = SensorRecord::new("S002");
        rec.apply(3.0, datetime!(2024-05-01 10:00 UTC));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["id"], "S002");
        assert_eq!(v["flowRate"], 3.0);
        assert_eq!(v["active"], true);
        assert_eq!(v["lastUpdate"], "2024-05-01T10:00:00Z");
    }
}
