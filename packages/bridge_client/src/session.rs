//! The embedded client's end of the channel.
//!
//! Dials the backend, answers its calls through a [`Dispatcher`], and redials
//! with exponential backoff whenever the socket drops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use host_bridge::{CONNECTED, Dispatcher, Envelope};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const OUTBOUND_CAPACITY: usize = 100;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// How a single session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The backend closed the socket or it failed mid-stream.
    Disconnected,
    /// The caller cancelled.
    Cancelled,
}

pub struct BridgeClient {
    url: String,
    dispatcher: Arc<Dispatcher>,
    connection_id: watch::Sender<Option<String>>,
}

impl BridgeClient {
    pub fn new(url: impl Into<String>, dispatcher: Dispatcher) -> Self {
        let (connection_id, _) = watch::channel(None);
        Self {
            url: url.into(),
            dispatcher: Arc::new(dispatcher),
            connection_id,
        }
    }

    /// The id the backend assigned to the current session, `None` while offline.
    pub fn connection_id(&self) -> watch::Receiver<Option<String>> {
        self.connection_id.subscribe()
    }

    /// Connect once and serve until the socket closes or `cancel` fires.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SessionEnd> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        info!(url = %self.url, "connected to bridge");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(OUTBOUND_CAPACITY);

        // Single writer: every reply funnels through here.
        let writer = async move {
            while let Some(envelope) = out_rx.recv().await {
                let json = serde_json::to_string(&envelope)?;
                ws_write
                    .send(tungstenite::Message::Text(json.into()))
                    .await
                    .context("websocket write failed")?;
            }
            Ok::<_, anyhow::Error>(())
        };

        let reader = async {
            while let Some(msg) = ws_read.next().await {
                match msg.context("websocket read failed")? {
                    tungstenite::Message::Text(text) => {
                        let envelope = match Envelope::from_json(&text) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!(error = %e, "malformed envelope ignored");
                                continue;
                            }
                        };
                        if envelope.kind == CONNECTED && envelope.is_notification() {
                            self.record_connection_id(&envelope);
                            continue;
                        }
                        // Each envelope on its own task so a slow handler
                        // never holds up the next message.
                        let dispatcher = self.dispatcher.clone();
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            if let Some(reply) = dispatcher.dispatch(envelope).await {
                                if out_tx.send(reply).await.is_err() {
                                    debug!("session ended before reply could be sent");
                                }
                            }
                        });
                    }
                    tungstenite::Message::Close(_) => {
                        info!("bridge closed the connection");
                        break;
                    }
                    _ => {}
                }
            }
            Ok::<_, anyhow::Error>(())
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Ok(SessionEnd::Cancelled),
            result = writer => result.map(|_| SessionEnd::Disconnected),
            result = reader => result.map(|_| SessionEnd::Disconnected),
        };
        self.connection_id.send_replace(None);
        outcome
    }

    /// Serve forever, redialing with exponential backoff (1s doubling to 60s).
    ///
    /// The delay resets after any session that managed to connect.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut attempt = 0u32;
        loop {
            match self.run_once(&cancel).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Disconnected) => {
                    info!("disconnected from bridge, will reconnect");
                    attempt = 0;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt == 1 {
                        warn!(error = %e, "bridge session failed");
                    } else {
                        debug!(error = %e, attempt, "bridge session failed");
                    }
                }
            }

            let delay = reconnect_delay(attempt);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("bridge client stopped");
    }

    fn record_connection_id(&self, envelope: &Envelope) {
        let id = envelope
            .data
            .as_ref()
            .and_then(|d| d.get("connection_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match id {
            Some(id) => {
                info!(conn_id = %id, "bridge assigned connection id");
                self.connection_id.send_replace(Some(id));
            }
            None => error!("connected notification without a connection id"),
        }
    }
}

/// Backoff before reconnect attempt number `attempt` (0 after a clean session).
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(6)).min(MAX_RECONNECT_DELAY)
}
