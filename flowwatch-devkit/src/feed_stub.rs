/*!
Stub WebSocket feed for tests without a sensor board

Listens on a random local port and plays the microcontroller's part:
pushes scripted telemetry frames to every connected client and can
drop the connection on demand to simulate a board going offline.
*/

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

#[derive(Debug, Clone)]
enum StubCommand {
    Send(String),
    SendBinary(Vec<u8>),
    Disconnect,
}

pub struct FeedStub {
    addr: SocketAddr,
    commands: broadcast::Sender<StubCommand>,
    connected: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
    accept_loop: JoinHandle<()>,
}

impl FeedStub {
    /// Binds `127.0.0.1:0` and starts accepting WebSocket clients.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding feed stub")?;
        let addr = listener.local_addr()?;
        let (commands, _) = broadcast::channel(256);
        let connected = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let accept_loop = tokio::spawn(accept_clients(
            listener,
            commands.clone(),
            connected.clone(),
            accepted.clone(),
        ));
        log::info!("🔌 [STUB] feed listening on ws://{}", addr);

        Ok(Self { addr, commands, connected, accepted, accept_loop })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Clients currently connected.
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    /// Clients accepted since start, including ones already gone.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Pushes one text frame to every connected client.
    pub fn send<S: Into<String>>(&self, text: S) -> Result<()> {
        let text = text.into();
        log::debug!("📤 [STUB] {}", text);
        self.commands
            .send(StubCommand::Send(text))
            .map_err(|_| anyhow::anyhow!("no client connected to the feed stub"))?;
        Ok(())
    }

    /// Pushes one binary frame to every connected client.
    pub fn send_binary(&self, bytes: Vec<u8>) -> Result<()> {
        log::debug!("📤 [STUB] {} binary bytes", bytes.len());
        self.commands
            .send(StubCommand::SendBinary(bytes))
            .map_err(|_| anyhow::anyhow!("no client connected to the feed stub"))?;
        Ok(())
    }

    /// Sends a close frame to every client and ends their connections.
    pub fn disconnect_all(&self) {
        log::info!("✂️ [STUB] dropping {} client(s)", self.connected());
        let _ = self.commands.send(StubCommand::Disconnect);
    }

    /// Waits until at least `n` clients are connected.
    pub async fn wait_for_clients(&self, n: usize, timeout: Duration) -> Result<()> {
        let connected = self.connected.clone();
        crate::test_utils::wait_until(timeout, || connected.load(Ordering::SeqCst) >= n)
            .await
            .with_context(|| format!("waiting for {} feed client(s)", n))
    }

    /// Stops accepting new clients and drops the current ones.
    pub fn stop(&self) {
        self.disconnect_all();
        self.accept_loop.abort();
    }
}

impl Drop for FeedStub {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn accept_clients(
    listener: TcpListener,
    commands: broadcast::Sender<StubCommand>,
    connected: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
) {
    loop {
        let (tcp, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("⚠️ [STUB] accept failed: {}", e);
                continue;
            }
        };
        // subscribe before the handshake completes so no frame is missed
        let rx = commands.subscribe();
        let connected = connected.clone();
        accepted.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            if let Err(e) = serve_client(tcp, rx, &connected).await {
                log::warn!("⚠️ [STUB] client {} ended with error: {}", peer, e);
            }
        });
    }
}

async fn serve_client(
    tcp: TcpStream,
    commands: broadcast::Receiver<StubCommand>,
    connected: &AtomicUsize,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(tcp).await?;
    connected.fetch_add(1, Ordering::SeqCst);
    let result = client_loop(ws, commands).await;
    connected.fetch_sub(1, Ordering::SeqCst);
    result
}

async fn client_loop(
    ws: WebSocketStream<TcpStream>,
    mut commands: broadcast::Receiver<StubCommand>,
) -> Result<()> {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Ok(StubCommand::Send(text)) => sink.send(Message::Text(text)).await?,
                Ok(StubCommand::SendBinary(bytes)) => sink.send(Message::Binary(bytes)).await?,
                Ok(StubCommand::Disconnect) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("⚠️ [STUB] client lagged, {} frames skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            incoming = stream.next() => match incoming {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {}
            },
        }
    }
}
