/**
 * SESSION - Owner of the store, the live adapter and the fallback generator
 *
 * ROLE: Wires the three together for the lifetime of the application and
 * keeps exactly one of {live feed, fallback} driving the store.
 *
 * TASKS:
 * - supervisor: connect -> pump -> (optional delay -> reconnect)
 * - link watcher: reacts to LinkEvent, starts/stops the fallback ticks
 *
 * TEARDOWN: `shutdown()` closes the live link, cancels both tasks and the
 * fallback ticks, and keeps the last store contents. Calling it twice is fine.
 */

use crate::adapter::{LinkEvent, LinkState, PumpEnd, TelemetryAdapter};
use crate::config::KernelConfig;
use crate::fallback::{FallbackGenerator, FallbackSettings};
use crate::health::HealthTracker;
use crate::models::StoreSnapshot;
use crate::state::{new_state, Shared};
use crate::store::SensorStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub sensors: Vec<String>,
    pub feed_url: String,
    pub connect_timeout: Duration,
    pub reconnect_delay: Option<Duration>,
    pub fallback: FallbackSettings,
}

impl From<&KernelConfig> for SessionOptions {
    fn from(cfg: &KernelConfig) -> Self {
        Self {
            sensors: cfg.sensors.clone(),
            feed_url: cfg.feed.url(),
            connect_timeout: cfg.feed.connect_timeout(),
            reconnect_delay: cfg.feed.reconnect_delay(),
            fallback: FallbackSettings::from(&cfg.fallback),
        }
    }
}

pub struct Session {
    store: SensorStore,
    adapter: Arc<TelemetryAdapter>,
    fallback: Arc<FallbackGenerator>,
    health: HealthTracker,
    reconnect_delay: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
    events_rx: Shared<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    tasks: Shared<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(opts: SessionOptions) -> Self {
        let store = SensorStore::new(opts.sensors);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let adapter = TelemetryAdapter::new(opts.feed_url.clone(), opts.connect_timeout, store.clone(), events_tx);
        let fallback = FallbackGenerator::new(store.clone(), opts.fallback);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            health: HealthTracker::new(opts.feed_url),
            store,
            adapter: Arc::new(adapter),
            fallback: Arc::new(fallback),
            reconnect_delay: opts.reconnect_delay,
            shutdown_tx,
            events_rx: new_state(Some(events_rx)),
            tasks: new_state(Vec::new()),
        }
    }

    pub fn from_config(cfg: &KernelConfig) -> Self {
        Self::new(SessionOptions::from(cfg))
    }

    /// Starts simulated data right away, then tries the live feed in the
    /// background. Only the first call has an effect.
    pub fn start(&self) {
        let Some(events_rx) = self.events_rx.lock().take() else {
            debug!("[session] already started");
            return;
        };
        if *self.shutdown_tx.borrow() {
            return;
        }
        info!("[session] starting with {} sensors, feed {}", self.store.len(), self.adapter.url());

        self.fallback.start();
        let watcher = tokio::spawn(watch_link(
            events_rx,
            self.fallback.clone(),
            self.health.clone(),
            self.shutdown_tx.subscribe(),
        ));
        let supervisor = tokio::spawn(supervise(
            self.adapter.clone(),
            self.reconnect_delay,
            self.shutdown_tx.subscribe(),
        ));
        self.tasks.lock().extend([supervisor, watcher]);
    }

    /// Closes the live link and cancels every periodic task. The store keeps
    /// its last contents.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!("[session] task failed during shutdown: {e}");
                }
            }
        }
        self.fallback.stop();
        info!("[session] stopped");
    }

    pub fn store(&self) -> &SensorStore {
        &self.store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn link_state(&self) -> LinkState {
        self.adapter.state()
    }

    pub fn is_simulating(&self) -> bool {
        self.fallback.is_running()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn supervise(
    adapter: Arc<TelemetryAdapter>,
    reconnect_delay: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let attempt = tokio::select! {
            r = adapter.connect() => r,
            _ = shutdown.wait_for(|stop| *stop) => return,
        };
        if let Ok(link) = attempt {
            if adapter.pump(link, &mut shutdown).await == PumpEnd::Shutdown {
                return;
            }
        }

        match reconnect_delay {
            Some(delay) => {
                debug!("[session] retrying live feed in {delay:?}");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait_for(|stop| *stop) => return,
                }
            }
            None => {
                info!("[session] no reconnect configured, staying on simulated data");
                let _ = shutdown.wait_for(|stop| *stop).await;
                return;
            }
        }
    }
}

async fn watch_link(
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    fallback: Arc<FallbackGenerator>,
    health: HealthTracker,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => return,
            },
            _ = shutdown.wait_for(|stop| *stop) => return,
        };
        health.record(&event);
        match event {
            LinkEvent::Connected => fallback.stop(),
            LinkEvent::ConnectFailed(_) | LinkEvent::Disconnected(_) => {
                if !*shutdown.borrow() {
                    fallback.start();
                }
            }
        }
    }
}
