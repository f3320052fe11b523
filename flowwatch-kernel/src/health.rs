use crate::adapter::{LinkEvent, LinkState};
use crate::models::{FeedSource, IngestStats};
use crate::store::SensorStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub link: LinkState,
    pub source: FeedSource,
    pub feed_url: String,
    pub disconnects: u32,
    pub connect_failures: u32,
    pub sensors_tracked: u32,
    pub sensors_active: u32,
    pub ingest: IngestStats,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    feed_url: Arc<String>,
    link: Arc<parking_lot::Mutex<LinkState>>,
    disconnects: Arc<AtomicU32>,
    connect_failures: Arc<AtomicU32>,
}

impl HealthTracker {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            start_time: Instant::now(),
            feed_url: Arc::new(feed_url.into()),
            link: Arc::new(parking_lot::Mutex::new(LinkState::Disconnected)),
            disconnects: Arc::new(AtomicU32::new(0)),
            connect_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn record(&self, event: &LinkEvent) {
        match event {
            LinkEvent::Connected => *self.link.lock() = LinkState::Connected,
            LinkEvent::ConnectFailed(_) => {
                self.connect_failures.fetch_add(1, Ordering::Relaxed);
                *self.link.lock() = LinkState::Disconnected;
            }
            LinkEvent::Disconnected(_) => {
                self.disconnects.fetch_add(1, Ordering::Relaxed);
                *self.link.lock() = LinkState::Disconnected;
            }
        }
    }

    pub fn link(&self) -> LinkState {
        *self.link.lock()
    }

    pub fn get_health(&self, store: &SensorStore) -> KernelHealth {
        let snap = store.snapshot();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            link: self.link(),
            source: snap.source,
            feed_url: self.feed_url.as_ref().clone(),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            sensors_tracked: snap.len() as u32,
            sensors_active: snap.active_count() as u32,
            ingest: snap.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_link_events() {
        let tracker = HealthTracker::new("ws://10.0.0.2:81");
        let store = SensorStore::new(["S001", "S002"]);
        store.apply_raw_message("S001:2.5");

        tracker.record(&LinkEvent::ConnectFailed("refused".into()));
        tracker.record(&LinkEvent::Connected);
        assert_eq!(tracker.link(), LinkState::Connected);
        tracker.record(&LinkEvent::Disconnected("closed by peer".into()));

        let h = tracker.get_health(&store);
        assert_eq!(h.link, LinkState::Disconnected);
        assert_eq!(h.connect_failures, 1);
        assert_eq!(h.disconnects, 1);
        assert_eq!(h.sensors_tracked, 2);
        assert_eq!(h.sensors_active, 1);
        assert_eq!(h.ingest.applied, 1);
        assert_eq!(h.feed_url, "ws://10.0.0.2:81");
    }
}
