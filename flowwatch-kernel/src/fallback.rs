//! Synthetic readings for every known sensor while no live feed is connected.
//!
//! The ticking task only talks to the store through [`SensorStore::ingest`]
//! tagged as [`FeedSource::Simulated`], so once the session marks the live
//! feed as authoritative any in-flight tick is dropped by the store.

use crate::config::FallbackConf;
use crate::models::{FeedSource, SensorReading};
use crate::state::{new_state, Shared};
use crate::store::SensorStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest tick the generator accepts.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackSettings {
    pub interval: Duration,
    /// Chance that a sensor reports flow on a given tick.
    pub flow_probability: f64,
    /// Upper bound (exclusive) of the simulated flow, L/min.
    pub max_flow: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self::from(&FallbackConf::default())
    }
}

impl From<&FallbackConf> for FallbackSettings {
    fn from(c: &FallbackConf) -> Self {
        Self {
            interval: c.interval(),
            flow_probability: c.flow_probability,
            max_flow: c.max_flow,
        }
    }
}

impl FallbackSettings {
    /// Settings the ticking task can run with: interval at least
    /// [`MIN_INTERVAL`], probability within `[0, 1]` (NaN counts as 0) and a
    /// finite non-negative `max_flow`.
    pub fn sanitized(self) -> Self {
        let flow_probability = if self.flow_probability.is_nan() {
            0.0
        } else {
            self.flow_probability.clamp(0.0, 1.0)
        };
        let max_flow = if self.max_flow.is_finite() { self.max_flow.max(0.0) } else { 0.0 };
        Self {
            interval: self.interval.max(MIN_INTERVAL),
            flow_probability,
            max_flow,
        }
    }
}

/// One tick worth of readings: each sensor independently flows in
/// `[0, max_flow)` with `flow_probability`, otherwise reports exactly 0.
pub fn synthesize<R: Rng>(
    rng: &mut R,
    sensor_ids: &[String],
    settings: &FallbackSettings,
) -> Vec<SensorReading> {
    sensor_ids
        .iter()
        .filter_map(|id| {
            let flowing = settings.flow_probability > 0.0
                && rng.gen_bool(settings.flow_probability.min(1.0));
            let flow = if flowing && settings.max_flow.is_finite() && settings.max_flow > 0.0 {
                rng.gen_range(0.0..settings.max_flow)
            } else {
                0.0
            };
            SensorReading::new(id.clone(), flow).ok()
        })
        .collect()
}

pub struct FallbackGenerator {
    store: SensorStore,
    settings: FallbackSettings,
    task: Shared<Option<JoinHandle<()>>>,
}

impl FallbackGenerator {
    pub fn new(store: SensorStore, settings: FallbackSettings) -> Self {
        let usable = settings.sanitized();
        if usable != settings {
            warn!("[fallback] adjusted settings {settings:?} to {usable:?}");
        }
        Self { store, settings: usable, task: new_state(None) }
    }

    pub fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    /// Spawns the ticking task unless it already runs. The first tick fires
    /// immediately.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let store = self.store.clone();
        let settings = self.settings;
        let ids = store.known_ids();
        info!("[fallback] simulating {} sensors every {:?}", ids.len(), settings.interval);

        *task = Some(tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = interval(settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let readings = synthesize(&mut rng, &ids, &settings);
                let applied = readings
                    .iter()
                    .filter(|r| store.ingest(FeedSource::Simulated, r).is_applied())
                    .count();
                debug!("[fallback] tick applied {applied}/{} readings", readings.len());
            }
        }));
    }

    /// Aborts the ticking task. Safe to call when already stopped.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("[fallback] stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FallbackGenerator {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}
