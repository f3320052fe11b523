/*!
Test harness for FlowWatch ingestion tests

- Starts a `FeedStub` and initialises logging once
- Sends readings in either wire form
- Polling helpers to wait for asynchronous effects without fixed sleeps
*/

use crate::feed_stub::FeedStub;
use crate::telemetry::{TelemetryMessageBuilder, WireFormat};
use anyhow::Result;
use std::time::{Duration, Instant};

const POLL_EVERY: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(POLL_EVERY).await;
    }
    if condition() {
        return Ok(());
    }
    log::warn!("⏰ Condition not met within {:?}", timeout);
    anyhow::bail!("condition not met within {:?}", timeout)
}

pub struct TestHarness {
    pub feed: FeedStub,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        env_logger::builder().is_test(true).try_init().ok();
        let feed = FeedStub::start().await?;
        Ok(Self { feed })
    }

    pub fn feed_url(&self) -> String {
        self.feed.url()
    }

    /// Waits until the code under test has connected to the stub.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        self.feed.wait_for_clients(1, timeout).await
    }

    pub fn send_reading(&self, sensor_id: &str, flow_rate: f64, format: WireFormat) -> Result<()> {
        self.feed.send(format.encode(sensor_id, flow_rate))?;
        log::info!("📨 Sent {} = {} L/min ({:?})", sensor_id, flow_rate, format);
        Ok(())
    }

    pub fn send_raw<S: Into<String>>(&self, frame: S) -> Result<()> {
        self.feed.send(frame)
    }

    pub fn send_malformed(&self) -> Result<()> {
        self.feed.send(TelemetryMessageBuilder::malformed())
    }

    /// Simulates the sensor board going offline.
    pub fn drop_feed(&self) {
        self.feed.disconnect_all();
    }
}
