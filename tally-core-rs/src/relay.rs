//! Topic relay
//!
//! Minimal WebSocket publish/subscribe hub for scoring nodes. Each
//! connection keeps its own exact-match subscription set; every publication
//! is fanned out through a broadcast channel and filtered per connection.
//! Nothing is retained: a client only sees messages published while it is
//! connected and subscribed.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::ws::Frame;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Per-connection backlog before a slow client starts missing messages
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9001)),
            channel_capacity: 1024,
        }
    }
}

impl RelayConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct Routed {
    topic: String,
    payload: String,
}

/// Relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub clients_connected: usize,
    pub messages_routed: u64,
}

/// WebSocket topic relay
pub struct Relay {
    listener: TcpListener,
    tx: broadcast::Sender<Arc<Routed>>,
    stats: Arc<RwLock<RelayStats>>,
}

impl Relay {
    /// Bind the listening socket
    pub async fn bind(config: RelayConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.listen).await?;
        let (tx, _) = broadcast::channel(config.channel_capacity);

        Ok(Self {
            listener,
            tx,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared view of the relay counters
    pub fn stats(&self) -> Arc<RwLock<RelayStats>> {
        self.stats.clone()
    }

    /// Run the accept loop in a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept clients forever
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Relay: listening on {}", addr),
            Err(e) => warn!("Relay: listening on unknown address: {}", e),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let tx = self.tx.clone();
                    let stats = self.stats.clone();

                    tokio::spawn(async move {
                        stats.write().clients_connected += 1;
                        if let Err(e) = handle_client(stream, peer_addr, tx, stats.clone()).await {
                            warn!("Relay: client {} error: {}", peer_addr, e);
                        }
                        stats.write().clients_connected -= 1;
                        info!("Relay: client {} disconnected", peer_addr);
                    });
                }
                Err(e) => {
                    error!("Relay: accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tx: broadcast::Sender<Arc<Routed>>,
    stats: Arc<RwLock<RelayStats>>,
) -> Result<(), TransportError> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut rx = tx.subscribe();
    let mut topics: HashSet<String> = HashSet::new();

    info!("Relay: client {} connected", peer_addr);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                        Ok(Frame::Subscribe { topics: added }) => {
                            debug!("Relay: {} subscribed to {:?}", peer_addr, added);
                            topics.extend(added);
                        }
                        Ok(Frame::Publish { topic, payload }) => {
                            stats.write().messages_routed += 1;
                            // Err only means no connection is listening right now
                            let _ = tx.send(Arc::new(Routed { topic, payload }));
                        }
                        Ok(Frame::Message { .. }) => {
                            debug!("Relay: ignoring message frame from {}", peer_addr);
                        }
                        Err(e) => warn!("Relay: bad frame from {}: {}", peer_addr, e),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }

            routed = rx.recv() => {
                match routed {
                    Ok(routed) => {
                        if topics.contains(&routed.topic) {
                            let frame = Frame::Message {
                                topic: routed.topic.clone(),
                                payload: routed.payload.clone(),
                            };
                            ws_tx.send(Message::Text(frame.to_text()?)).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Relay: client {} lagged, {} messages lost", peer_addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let relay = Relay::bind(RelayConfig::new(SocketAddr::from(([127, 0, 0, 1], 0))))
            .await
            .unwrap();
        let addr = relay.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(*relay.stats().read(), RelayStats::default());
    }
}
