/**
 * TELEMETRY ADAPTER - WebSocket link to the flow-sensor microcontroller
 *
 * ROLE: Opens one `ws://host:port` connection and hands every inbound
 * message, verbatim and in arrival order, to the store as a live reading.
 *
 * STATE MACHINE: `Disconnected` (initial) and `Connected`.
 *   connect ok            -> Connected    (store source = Live, LinkEvent::Connected)
 *   connect failure       -> Disconnected (LinkEvent::ConnectFailed)
 *   close / receive error -> Disconnected (store source = Simulated, LinkEvent::Disconnected, once)
 *
 * A missing sensor board is routine: failures are reported, never fatal.
 * Reconnection is the session's business, not the adapter's.
 */

use crate::config::FeedConf;
use crate::models::FeedSource;
use crate::state::{new_state, Shared};
use crate::store::SensorStore;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    ConnectFailed(String),
    Disconnected(String),
}

/// Why [`TelemetryAdapter::pump`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    Closed,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("connecting to {0} timed out")]
    Timeout(String),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("already connected")]
    AlreadyConnected,
}

pub struct TelemetryAdapter {
    url: String,
    connect_timeout: Duration,
    store: SensorStore,
    state: Shared<LinkState>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl TelemetryAdapter {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        store: SensorStore,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            store,
            state: new_state(LinkState::Disconnected),
            events,
        }
    }

    pub fn from_conf(
        feed: &FeedConf,
        store: SensorStore,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self::new(feed.url(), feed.connect_timeout(), store, events)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// One connection attempt. On success the store switches to the live
    /// source before any message can arrive.
    pub async fn connect(&self) -> Result<FeedStream, AdapterError> {
        if self.state() == LinkState::Connected {
            return Err(AdapterError::AlreadyConnected);
        }
        info!("[adapter] connecting to {}", self.url);

        let attempt = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await;
        let result = match attempt {
            Err(_) => Err(AdapterError::Timeout(self.url.clone())),
            Ok(Err(e)) => Err(AdapterError::from(e)),
            Ok(Ok((stream, _response))) => Ok(stream),
        };

        match result {
            Ok(stream) => {
                *self.state.lock() = LinkState::Connected;
                self.store.set_source(FeedSource::Live);
                info!("[adapter] live feed connected at {}", self.url);
                self.emit(LinkEvent::Connected);
                Ok(stream)
            }
            Err(e) => {
                warn!("[adapter] feed unavailable ({e}), staying on simulated data");
                self.emit(LinkEvent::ConnectFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Forwards messages to the store until the link closes or `shutdown`
    /// turns true. Always leaves the adapter `Disconnected`.
    pub async fn pump(&self, mut link: FeedStream, shutdown: &mut watch::Receiver<bool>) -> PumpEnd {
        loop {
            tokio::select! {
                // the watch::Ref must not live across the close await
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    if let Err(e) = link.close(None).await {
                        debug!("[adapter] close handshake failed: {e}");
                    }
                    self.close_quietly();
                    return PumpEnd::Shutdown;
                }
                msg = link.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.deliver(&text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.deliver(&text),
                        Err(_) => warn!("[adapter] dropped non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by peer: {} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by peer".into());
                        self.mark_disconnected(&reason);
                        return PumpEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.mark_disconnected(&e.to_string());
                        return PumpEnd::Closed;
                    }
                    None => {
                        self.mark_disconnected("stream ended");
                        return PumpEnd::Closed;
                    }
                },
            }
        }
    }

    fn deliver(&self, text: &str) {
        self.store.ingest_raw(FeedSource::Live, text);
    }

    /// Connected -> Disconnected. Emits at most one event per connection.
    fn mark_disconnected(&self, reason: &str) {
        let was = std::mem::replace(&mut *self.state.lock(), LinkState::Disconnected);
        if was != LinkState::Connected {
            return;
        }
        self.store.set_source(FeedSource::Simulated);
        warn!("[adapter] live feed lost: {reason}");
        self.emit(LinkEvent::Disconnected(reason.to_string()));
    }

    /// Requested close: back to `Disconnected` and `Simulated` without a
    /// `LinkEvent`, so health only counts unexpected losses.
    fn close_quietly(&self) {
        let was = std::mem::replace(&mut *self.state.lock(), LinkState::Disconnected);
        if was == LinkState::Connected {
            self.store.set_source(FeedSource::Simulated);
            info!("[adapter] live feed closed on shutdown");
        }
    }

    fn emit(&self, event: LinkEvent) {
        // receiver gone means the session is tearing down
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowwatch_devkit::{wait_until, FeedStub};
    use std::sync::Arc;

    fn adapter(url: &str) -> (TelemetryAdapter, mpsc::UnboundedReceiver<LinkEvent>, SensorStore) {
        let store = SensorStore::new(["S001", "S002"]);
        let (tx, rx) = mpsc::unbounded_channel();
        (TelemetryAdapter::new(url, Duration::from_secs(2), store.clone(), tx), rx, store)
    }

    #[tokio::test]
    async fn refused_connection_is_not_fatal() {
        // bind then drop to get a port nobody listens on
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let (adapter, mut rx, store) = adapter(&format!("ws://127.0.0.1:{port}"));

        assert!(adapter.connect().await.is_err());
        assert_eq!(adapter.state(), LinkState::Disconnected);
        assert_eq!(store.source(), FeedSource::Simulated);
        assert!(matches!(rx.recv().await, Some(LinkEvent::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn malformed_url_is_reported() {
        let (adapter, mut rx, _) = adapter("not a url");
        assert!(matches!(adapter.connect().await, Err(AdapterError::WebSocket(_))));
        assert!(matches!(rx.recv().await, Some(LinkEvent::ConnectFailed(_))));
    }

    #[test]
    fn disconnect_without_connection_emits_nothing() {
        let (adapter, mut rx, store) = adapter("ws://127.0.0.1:1");
        store.set_source(FeedSource::Live);
        adapter.mark_disconnected("spurious");
        assert!(rx.try_recv().is_err());
        assert_eq!(store.source(), FeedSource::Live);
    }

    #[test]
    fn disconnect_emits_exactly_once() {
        let (adapter, mut rx, store) = adapter("ws://127.0.0.1:1");
        *adapter.state.lock() = LinkState::Connected;
        store.set_source(FeedSource::Live);

        adapter.mark_disconnected("closed by peer");
        adapter.mark_disconnected("stream ended");

        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Disconnected("closed by peer".into()));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.source(), FeedSource::Simulated);
    }

    #[tokio::test]
    async fn silent_handshake_times_out() {
        // accepted by the kernel backlog, never answered
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let store = SensorStore::new(["S001"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let adapter = TelemetryAdapter::new(url, Duration::from_millis(200), store.clone(), tx);

        assert!(matches!(adapter.connect().await, Err(AdapterError::Timeout(_))));
        assert_eq!(adapter.state(), LinkState::Disconnected);
        assert_eq!(store.source(), FeedSource::Simulated);
        assert!(matches!(rx.recv().await, Some(LinkEvent::ConnectFailed(_))));
        drop(listener);
    }

    #[tokio::test]
    async fn binary_frames_and_quiet_shutdown() {
        let stub = FeedStub::start().await.unwrap();
        let (adapter, mut rx, store) = adapter(&stub.url());
        let link = adapter.connect().await.unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));
        assert_eq!(store.source(), FeedSource::Live);

        let adapter = Arc::new(adapter);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let pump = tokio::spawn({
            let adapter = adapter.clone();
            async move { adapter.pump(link, &mut stop_rx).await }
        });
        stub.wait_for_clients(1, Duration::from_secs(2)).await.unwrap();

        stub.send_binary(vec![0xff, 0xfe, 0x00]).unwrap();
        stub.send_binary(b"S002:4.5".to_vec()).unwrap();
        wait_until(Duration::from_secs(2), || {
            store.record("S002").map(|r| r.flow_rate()) == Some(4.5)
        })
        .await
        .unwrap();
        assert_eq!(store.stats().malformed, 0);

        stop_tx.send_replace(true);
        assert_eq!(pump.await.unwrap(), PumpEnd::Shutdown);
        assert_eq!(adapter.state(), LinkState::Disconnected);
        assert_eq!(store.source(), FeedSource::Simulated);
        // requested close is not a lost link
        assert!(rx.try_recv().is_err());
    }
}
