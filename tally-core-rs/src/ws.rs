//! WebSocket transport
//!
//! Connects to a topic relay, subscribes to the node's topics on every
//! (re)connect and forwards relay frames as transport events.
//! Handles:
//! - Connect timeout
//! - Automatic reconnection with a fixed delay
//! - Dropping publishes while disconnected (no replay)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};

/// Relay wire frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Frame {
    /// Client → relay: add topics to this connection
    Subscribe { topics: Vec<String> },
    /// Client → relay: publish raw JSON text on a topic
    Publish { topic: String, payload: String },
    /// Relay → client: a publication on a subscribed topic
    Message { topic: String, payload: String },
}

impl Frame {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Configuration for the WebSocket transport
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// Relay URL (`ws://` or `wss://`)
    pub url: String,
    /// Client identity, used in logs
    pub client_id: String,
    /// Delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001".to_string(),
            client_id: format!("presentation_scorer_{}", &Uuid::new_v4().simple().to_string()[..8]),
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl WsTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Outbound handle of a WebSocket relay connection
pub struct WsTransport {
    outgoing_tx: mpsc::Sender<Frame>,
    connected: Arc<AtomicBool>,
}

enum Exit {
    Reconnect,
    Shutdown,
}

impl WsTransport {
    /// Start the connection task. Subscribes to `topics` on every connect.
    pub fn spawn(
        config: WsTransportConfig,
        topics: Vec<String>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(config.url));
        }

        let (outgoing_tx, outgoing_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run(config, topics, outgoing_rx, events_tx, connected.clone()));

        Ok((
            Self {
                outgoing_tx,
                connected,
            },
            events_rx,
        ))
    }
}

impl Transport for WsTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        if !self.is_connected() {
            warn!("WS: not connected, dropping publish to {}", topic);
            return;
        }

        let frame = Frame::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
        };
        if self.outgoing_tx.try_send(frame).is_err() {
            warn!("WS: send queue full or closed, dropping publish to {}", topic);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Connection loop: connect, serve, wait, repeat until the handle is dropped
async fn run(
    config: WsTransportConfig,
    topics: Vec<String>,
    mut outgoing_rx: mpsc::Receiver<Frame>,
    events_tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    loop {
        info!("WS: {} connecting to {}", config.client_id, config.url);

        let exit = match connect_and_run(&config, &topics, &mut outgoing_rx, &events_tx, &connected).await {
            Ok(exit) => exit,
            Err(e) => {
                error!("WS: connection error: {}", e);
                Exit::Reconnect
            }
        };

        if connected.swap(false, Ordering::AcqRel) && events_tx.send(TransportEvent::Disconnected).await.is_err() {
            break;
        }

        if matches!(exit, Exit::Shutdown) || events_tx.is_closed() {
            debug!("WS: transport shut down");
            break;
        }

        // Anything queued while the link was going down is not replayed
        let mut dropped = 0usize;
        while outgoing_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!("WS: dropped {} unsent publishes", dropped);
        }

        info!("WS: reconnecting in {:?}", config.reconnect_delay);
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn connect_and_run(
    config: &WsTransportConfig,
    topics: &[String],
    outgoing_rx: &mut mpsc::Receiver<Frame>,
    events_tx: &mpsc::Sender<TransportEvent>,
    connected: &AtomicBool,
) -> Result<Exit, TransportError> {
    let (ws_stream, _) = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| TransportError::ConnectTimeout(config.url.clone()))??;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let subscribe = Frame::Subscribe {
        topics: topics.to_vec(),
    };
    ws_tx.send(Message::Text(subscribe.to_text()?)).await?;

    connected.store(true, Ordering::Release);
    info!("WS: connected to {}, {} topics", config.url, topics.len());
    if events_tx.send(TransportEvent::Connected).await.is_err() {
        return Ok(Exit::Shutdown);
    }

    loop {
        tokio::select! {
            frame = outgoing_rx.recv() => {
                match frame {
                    Some(frame) => {
                        debug!("WS: sending {:?}", frame);
                        ws_tx.send(Message::Text(frame.to_text()?)).await?;
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(Exit::Shutdown);
                    }
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                        Ok(Frame::Message { topic, payload }) => {
                            let event = TransportEvent::Message {
                                topic,
                                payload: payload.into_bytes(),
                            };
                            if events_tx.send(event).await.is_err() {
                                return Ok(Exit::Shutdown);
                            }
                        }
                        Ok(other) => debug!("WS: ignoring unexpected frame {:?}", other),
                        Err(e) => warn!("WS: failed to parse relay frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) => {
                        info!("WS: closed by relay");
                        return Ok(Exit::Reconnect);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        info!("WS: stream ended");
                        return Ok(Exit::Reconnect);
                    }
                }
            }
        }
    }
}
