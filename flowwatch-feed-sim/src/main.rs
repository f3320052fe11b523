//! Simulated flow-sensor board.
//!
//! Every second each sensor's pulse count is simulated, converted to L/min
//! the way the firmware does (YF-S201, 7.5 pulses/s per L/min) and pushed
//! to every connected WebSocket client, one frame per sensor.
//!
//! Env: `FEED_SIM_BIND` (default `0.0.0.0:81`), `FEED_SIM_FORMAT`
//! (`json` | `colon`, default `json`), `FEED_SIM_SENSORS` (default
//! `S001,S002,S003,S004`).

use anyhow::Context;
use flowwatch_devkit::{flow_from_pulses, WireFormat};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const WINDOW: Duration = Duration::from_secs(1);
/// Chance per second that a valve changes state.
const TOGGLE_PROBABILITY: f64 = 0.1;

#[derive(Debug)]
struct SimSensor {
    id: String,
    open: bool,
}

impl SimSensor {
    /// Pulses counted over one window. Closed valves still see a trickle
    /// of noise pulses now and then.
    fn count_pulses<R: Rng>(&mut self, rng: &mut R) -> u32 {
        if rng.gen_bool(TOGGLE_PROBABILITY) {
            self.open = !self.open;
        }
        if self.open {
            rng.gen_range(15..150)
        } else if rng.gen_bool(0.2) {
            rng.gen_range(0..3)
        } else {
            0
        }
    }
}

fn sensors_from_env() -> Vec<SimSensor> {
    let list = std::env::var("FEED_SIM_SENSORS").unwrap_or_else(|_| "S001,S002,S003,S004".into());
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|id| SimSensor { id: id.to_string(), open: false })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("FEED_SIM_BIND").unwrap_or_else(|_| "0.0.0.0:81".into());
    let format: WireFormat = std::env::var("FEED_SIM_FORMAT")
        .unwrap_or_else(|_| "json".into())
        .parse()?;
    let mut sensors = sensors_from_env();
    anyhow::ensure!(!sensors.is_empty(), "FEED_SIM_SENSORS is empty");

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("[feed-sim] serving {} sensors on ws://{bind} ({format:?})", sensors.len());

    let (frames, _) = broadcast::channel::<String>(256);

    // accept loop
    let frames_for_accept = frames.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((tcp, peer)) => {
                    let rx = frames_for_accept.subscribe();
                    tokio::spawn(async move {
                        info!("[feed-sim] client {peer} connected");
                        if let Err(e) = serve_client(tcp, rx).await {
                            warn!("[feed-sim] client {peer}: {e}");
                        }
                        info!("[feed-sim] client {peer} gone");
                    });
                }
                Err(e) => warn!("[feed-sim] accept failed: {e}"),
            }
        }
    });

    // one frame per sensor per window
    let mut rng = rand::thread_rng();
    let mut ticker = interval(WINDOW);
    loop {
        ticker.tick().await;
        for sensor in sensors.iter_mut() {
            let pulses = sensor.count_pulses(&mut rng);
            let flow = flow_from_pulses(pulses, WINDOW);
            let frame = format.encode(&sensor.id, (flow * 100.0).round() / 100.0);
            debug!("[feed-sim] {frame}");
            // no subscribers just means nobody is listening yet
            let _ = frames.send(frame);
        }
    }
}

async fn serve_client(tcp: TcpStream, mut frames: broadcast::Receiver<String>) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(tcp).await?;
    let (mut sink, mut incoming) = ws.split();
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => sink.send(Message::Text(text)).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("[feed-sim] client lagging, {n} frames skipped"),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            msg = incoming.next() => match msg {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {}
            },
        }
    }
}
