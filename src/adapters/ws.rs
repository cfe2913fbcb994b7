//! WebSocket Transport - Agent-Facing Network Server
//!
//! Accepts agent connections over WebSocket, decodes JSON text frames
//! into typed `Inbound` messages, and implements the `Transport` port for
//! the outbound direction. The dispatcher never sees a byte: framing,
//! serialization, and per-connection writer tasks all live here.
//!
//! Per connection:
//! - a reader loop forwarding decoded envelopes into the dispatcher
//! - a writer task draining that connection's outbound queue
//! - an origin captured at accept time for registration pinning

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::ports::transport::{ConnectionId, Envelope, Inbound, Outbound, Transport};
use crate::usecases::registry::AgentRegistry;

/// Outbound half of the WebSocket transport: a registry of per-connection
/// writer queues. Serialization happens once per send; a slow or dead
/// peer only loses its own messages.
pub struct WsTransport {
    writers: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            writers: RwLock::new(HashMap::new()),
        }
    }

    async fn attach(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.writers.write().await.insert(connection, tx);
        rx
    }

    async fn detach(&self, connection: ConnectionId) {
        self.writers.write().await.remove(&connection);
    }

    fn encode(message: &Outbound) -> Result<Message> {
        let json = serde_json::to_string(message).context("Failed to encode outbound message")?;
        Ok(Message::Text(json.into()))
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, connection: ConnectionId, message: Outbound) -> Result<()> {
        let frame = Self::encode(&message)?;
        let writers = self.writers.read().await;
        match writers.get(&connection) {
            Some(writer) => {
                if writer.send(frame).is_err() {
                    debug!(connection = connection, "Writer task gone, frame dropped");
                }
                Ok(())
            }
            None => anyhow::bail!("connection {connection} is not attached"),
        }
    }

    async fn broadcast(&self, message: Outbound) -> Result<()> {
        let frame = Self::encode(&message)?;
        let writers = self.writers.read().await;
        for (connection, writer) in writers.iter() {
            if writer.send(frame.clone()).is_err() {
                debug!(connection = connection, "Writer task gone during broadcast");
            }
        }
        Ok(())
    }
}

/// Accept loop: binds the listener and runs until shutdown. Each accepted
/// socket gets a fresh connection id, its origin, and its own tasks.
#[instrument(skip(transport, registry, inbound, shutdown))]
pub async fn serve(
    bind_addr: String,
    transport: Arc<WsTransport>,
    registry: Arc<AgentRegistry>,
    inbound: mpsc::Sender<Envelope>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind WebSocket listener on {bind_addr}"))?;
    info!(addr = %bind_addr, "WebSocket transport listening");

    let next_connection = Arc::new(AtomicU64::new(1));
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("WebSocket transport shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, origin) = match accepted {
                    Ok(pair) => pair,
                    Err(error) => {
                        warn!(error = %error, "Accept failed");
                        continue;
                    }
                };
                let connection = next_connection.fetch_add(1, Ordering::Relaxed);
                let transport = Arc::clone(&transport);
                let registry = Arc::clone(&registry);
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    if let Err(error) =
                        handle_connection(socket, connection, origin, transport, registry, inbound)
                            .await
                    {
                        debug!(connection = connection, error = %error, "Connection ended");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    connection: ConnectionId,
    origin: std::net::SocketAddr,
    transport: Arc<WsTransport>,
    registry: Arc<AgentRegistry>,
    inbound: mpsc::Sender<Envelope>,
) -> Result<()> {
    let stream = accept_async(socket)
        .await
        .context("WebSocket handshake failed")?;
    info!(connection = connection, origin = %origin, "Agent connection accepted");

    let (mut sink, mut source) = stream.split();
    let mut outbound_rx = transport.attach(connection).await;

    // Writer: drain this connection's queue into the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Reader: decode frames and forward envelopes to the dispatcher.
    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                debug!(connection = connection, error = %error, "Read error");
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<Inbound>(&text) {
                Ok(message) => {
                    let envelope = Envelope {
                        connection,
                        origin,
                        message,
                    };
                    if inbound.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    // Undecodable frames never reach the core; observable here.
                    warn!(
                        connection = connection,
                        error = %error,
                        "Dropping malformed frame"
                    );
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            other => {
                debug!(connection = connection, frame = ?other, "Ignoring non-text frame");
            }
        }
    }

    transport.detach(connection).await;
    registry.disconnect(connection).await;
    writer.abort();
    info!(connection = connection, "Agent connection closed");
    Ok(())
}
