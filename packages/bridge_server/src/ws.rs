//! WebSocket endpoint the embedded clients dial.
//!
//! One socket per client. The registry owns the outbound queue; a writer task
//! drains it onto the socket. Inbound envelopes carrying a `request_id` are
//! replies and go straight to the bridge.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use host_bridge::{Bridge, CONNECTED, Envelope, PING, PONG};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let bridge = state.bridge.clone();
    let queue_capacity = state.server_config.send_queue_capacity;
    ws.on_upgrade(move |socket| handle_client_socket(socket, bridge, queue_capacity))
}

/// Drive one client socket from open to close.
pub async fn handle_client_socket(socket: WebSocket, bridge: Bridge, queue_capacity: usize) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Envelope>(queue_capacity);

    let conn_id = bridge.registry().register(tx.clone()).await;
    let Some(connection) = bridge.registry().get(&conn_id).await else {
        // Pruned before we got here; nothing to serve.
        return;
    };
    info!(conn_id = %conn_id, "client connected");

    let hello = Envelope::new(CONNECTED).with_data(json!({ "connection_id": conn_id }));
    if tx.send(hello).await.is_err() {
        warn!(conn_id = %conn_id, "failed to queue connected notification");
    }

    // Task to send queued envelopes to the WebSocket
    let sender_conn_id = conn_id.clone();
    let sender_task = async move {
        while let Some(envelope) = rx.recv().await {
            let json = match envelope.to_json() {
                Ok(j) => j,
                Err(e) => {
                    error!(conn_id = %sender_conn_id, error = %e, "failed to serialize envelope");
                    break;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    // Task to handle incoming envelopes
    let input_bridge = bridge.clone();
    let input_conn_id = conn_id.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match Envelope::from_json(&text) {
                    Ok(envelope) => {
                        handle_inbound(&input_bridge, &tx, &input_conn_id, envelope)
                    }
                    Err(e) => {
                        warn!(conn_id = %input_conn_id, error = %e, "malformed envelope ignored")
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!(conn_id = %input_conn_id, "client closed connection");
                    break;
                }
                Err(e) => {
                    warn!(conn_id = %input_conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn_id = %conn_id, "writer ended"),
        _ = input_task => debug!(conn_id = %conn_id, "reader ended"),
        _ = connection.closed() => debug!(conn_id = %conn_id, "connection dropped by registry"),
    }

    bridge.registry().unregister(&conn_id).await;
    info!(conn_id = %conn_id, "client disconnected");
}

fn handle_inbound(
    bridge: &Bridge,
    tx: &mpsc::Sender<Envelope>,
    conn_id: &str,
    envelope: Envelope,
) {
    if envelope.request_id.is_some() {
        bridge.resolve(envelope);
        return;
    }
    match envelope.kind.as_str() {
        PING => {
            // Full queue: drop the pong, keep reading.
            if let Err(e) = tx.try_send(Envelope::new(PONG)) {
                debug!(conn_id = %conn_id, error = %e, "pong not queued");
            }
        }
        PONG => trace!(conn_id = %conn_id, "pong"),
        other => debug!(conn_id = %conn_id, kind = %other, "ignoring client notification"),
    }
}

/// Broadcast a one-way `ping` every `interval` until cancelled.
///
/// Connections whose queue has closed are pruned by the broadcast itself.
pub fn spawn_heartbeat(bridge: Bridge, interval: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let delivered = bridge.broadcast(Envelope::new(PING)).await;
                    trace!(delivered, "heartbeat");
                }
            }
        }
    });
}
