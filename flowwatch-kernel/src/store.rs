/**
 * SENSOR STORE - Authoritative table of known water-flow sensors
 *
 * ROLE: One record per configured sensor, fed by the live adapter or the
 * fallback generator through a single ingestion entry point, read by the
 * map/list collaborators through `snapshot()`.
 *
 * CONCURRENCY: one parking_lot mutex over the whole table. Critical
 * sections are a map lookup and a field write; nothing awaits under the lock.
 *
 * SOURCE GATE: the store remembers which `FeedSource` is authorised. Readings
 * tagged with another source are dropped as `Superseded`, so a late fallback
 * tick can never overwrite live data.
 */

use crate::models::{FeedSource, IngestStats, SensorReading, SensorRecord, SensorsMap, StoreSnapshot};
use crate::parser::MessageParser;
use crate::state::{new_state, Shared};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const UPDATES_CAPACITY: usize = 64;

/// What happened to one message or reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(SensorRecord),
    Malformed,
    UnknownSensor(String),
    Superseded(FeedSource),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

struct StoreInner {
    records: SensorsMap,
    source: FeedSource,
    stats: IngestStats,
}

/// Cloneable handle; every clone points at the same table.
#[derive(Clone)]
pub struct SensorStore {
    inner: Shared<StoreInner>,
    parser: Arc<MessageParser>,
    updates: broadcast::Sender<SensorRecord>,
}

impl SensorStore {
    /// Creates one zeroed, inactive record per known id. Duplicates collapse.
    pub fn new<I, S>(known_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_parser(known_ids, MessageParser::default())
    }

    pub fn with_parser<I, S>(known_ids: I, parser: MessageParser) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records: SensorsMap = known_ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                (id.clone(), SensorRecord::new(id))
            })
            .collect();
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        Self {
            inner: new_state(StoreInner {
                records,
                source: FeedSource::Simulated,
                stats: IngestStats::default(),
            }),
            parser: Arc::new(parser),
            updates,
        }
    }

    /// Parses `text` and applies it whatever the authorised source is.
    pub fn apply_raw_message(&self, text: &str) -> ApplyOutcome {
        match self.parser.parse(text) {
            Ok(reading) => self.apply_reading(&reading),
            Err(e) => self.reject_malformed(text, &e.to_string()),
        }
    }

    pub fn apply_reading(&self, reading: &SensorReading) -> ApplyOutcome {
        let mut inner = self.inner.lock();
        self.apply_locked(&mut inner, reading)
    }

    /// Parses `text` and applies it only if `origin` is the authorised source.
    pub fn ingest_raw(&self, origin: FeedSource, text: &str) -> ApplyOutcome {
        match self.parser.parse(text) {
            Ok(reading) => self.ingest(origin, &reading),
            Err(e) => self.reject_malformed(text, &e.to_string()),
        }
    }

    pub fn ingest(&self, origin: FeedSource, reading: &SensorReading) -> ApplyOutcome {
        let mut inner = self.inner.lock();
        if inner.source != origin {
            inner.stats.superseded += 1;
            debug!(
                "[store] dropped {} reading for {}: {} feed is authoritative",
                origin,
                reading.sensor_id(),
                inner.source
            );
            return ApplyOutcome::Superseded(inner.source);
        }
        self.apply_locked(&mut inner, reading)
    }

    /// Switches the authorised source. Returns the previous one.
    pub fn set_source(&self, source: FeedSource) -> FeedSource {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.source, source)
    }

    pub fn source(&self) -> FeedSource {
        self.inner.lock().source
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock();
        StoreSnapshot {
            records: inner.records.values().cloned().collect(),
            source: inner.source,
            stats: inner.stats,
            taken_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn record(&self, id: &str) -> Option<SensorRecord> {
        self.inner.lock().records.get(id).cloned()
    }

    pub fn known_ids(&self) -> Vec<String> {
        self.inner.lock().records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    pub fn stats(&self) -> IngestStats {
        self.inner.lock().stats
    }

    /// Every applied reading is broadcast here. Slow receivers lag, they
    /// never block ingestion.
    pub fn subscribe(&self) -> broadcast::Receiver<SensorRecord> {
        self.updates.subscribe()
    }

    fn apply_locked(&self, inner: &mut StoreInner, reading: &SensorReading) -> ApplyOutcome {
        let Some(record) = inner.records.get_mut(reading.sensor_id()) else {
            inner.stats.unknown_sensor += 1;
            warn!("[store] rejected reading for unknown sensor {}", reading.sensor_id());
            return ApplyOutcome::UnknownSensor(reading.sensor_id().to_string());
        };
        record.apply(reading.flow_rate(), OffsetDateTime::now_utc());
        let updated = record.clone();
        inner.stats.applied += 1;
        debug!(
            "[store] {} flow={:.2} active={}",
            updated.id(),
            updated.flow_rate(),
            updated.active()
        );
        // no receivers is fine
        let _ = self.updates.send(updated.clone());
        ApplyOutcome::Applied(updated)
    }

    fn reject_malformed(&self, text: &str, reason: &str) -> ApplyOutcome {
        self.inner.lock().stats.malformed += 1;
        warn!("[store] discarded malformed telemetry {text:?}: {reason}");
        ApplyOutcome::Malformed
    }
}
