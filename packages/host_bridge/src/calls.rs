//! Correlated calls: request out, exactly one terminal outcome back.
//!
//! Each call moves through `Created -> Sent -> {Replied | TimedOut | ConnectionLost}`.
//! The pending entry is removed on every exit path, including when the caller
//! drops the call future, so a late reply can never resurrect a finished call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::BridgeError;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A call awaiting its reply.
struct PendingRequest {
    connection_id: ConnectionId,
    created_at: Instant,
    deadline: Instant,
    reply_tx: oneshot::Sender<Envelope>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

/// Removes its pending entry when dropped.
struct PendingGuard {
    pending: PendingMap,
    request_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.request_id);
        }
    }
}

#[derive(Clone)]
pub struct CallLayer {
    registry: Arc<ConnectionRegistry>,
    pending: PendingMap,
}

impl CallLayer {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send `request` to a connected client and wait for the matching reply.
    ///
    /// Any `request_id` already on the envelope is replaced. With several
    /// connections registered the earliest-registered one is the target.
    pub async fn call(&self, request: Envelope, timeout: Duration) -> Result<Value, BridgeError> {
        let Some(connection) = self.registry.first().await else {
            debug!(kind = %request.kind, "call with no client connected");
            return Err(BridgeError::NoClientConnected);
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let kind = request.kind.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = created_at
            .checked_add(timeout)
            .unwrap_or_else(|| created_at + FAR_FUTURE);

        // Registered before sending so a fast reply always finds its waiter.
        let _guard = self.insert(
            request_id.clone(),
            PendingRequest {
                connection_id: connection.id().to_string(),
                created_at,
                deadline,
                reply_tx,
            },
        );

        // A full outbound queue waits for room, but never past the deadline.
        let sent = tokio::select! {
            biased;
            result = connection.send(request.with_request_id(request_id.clone())) => result,
            _ = connection.closed() => Err(BridgeError::ConnectionLost),
            _ = tokio::time::sleep_until(deadline) => Err(BridgeError::TimedOut(timeout)),
        };
        match sent {
            Ok(()) => {
                debug!(conn_id = %connection.id(), request_id = %request_id, kind = %kind, "call sent");
            }
            Err(BridgeError::SendFailed(reason)) => {
                warn!(conn_id = %connection.id(), kind = %kind, error = %reason, "call send failed");
                self.registry.unregister(connection.id()).await;
                return Err(BridgeError::SendFailed(reason));
            }
            Err(e) => {
                warn!(conn_id = %connection.id(), request_id = %request_id, kind = %kind, error = %e, "call not sent");
                return Err(e);
            }
        }

        tokio::select! {
            biased;
            reply = reply_rx => match reply {
                Ok(reply) => reply.into_reply_result(),
                Err(_) => Err(BridgeError::ConnectionLost),
            },
            _ = connection.closed() => {
                warn!(conn_id = %connection.id(), request_id = %request_id, kind = %kind, "connection lost mid-call");
                Err(BridgeError::ConnectionLost)
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(request_id = %request_id, kind = %kind, ?timeout, "call timed out");
                Err(BridgeError::TimedOut(timeout))
            }
        }
    }

    /// Like [`CallLayer::call`], with serde on both sides of the wire.
    pub async fn call_typed<Req, Resp>(
        &self,
        kind: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, BridgeError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let data = serde_json::to_value(request)?;
        let reply = self
            .call(Envelope::new(kind).with_data(data), timeout)
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Hand a reply to its waiter. Returns `false` for unmatched replies.
    pub fn resolve(&self, reply: Envelope) -> bool {
        let Some(request_id) = reply.request_id.clone() else {
            return false;
        };
        let entry = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&request_id),
            Err(_) => None,
        };
        match entry {
            Some(pending) => {
                let now = Instant::now();
                debug!(
                    conn_id = %pending.connection_id,
                    request_id = %request_id,
                    elapsed_ms = now.duration_since(pending.created_at).as_millis() as u64,
                    late = now > pending.deadline,
                    "reply matched"
                );
                pending.reply_tx.send(reply).is_ok()
            }
            None => {
                debug!(request_id = %request_id, kind = %reply.kind, "dropping unmatched reply");
                false
            }
        }
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn insert(&self, request_id: String, request: PendingRequest) -> PendingGuard {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(request_id.clone(), request);
        }
        PendingGuard {
            pending: self.pending.clone(),
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Spawn a fake client that answers every request after `delay`.
    fn spawn_responder(
        calls: CallLayer,
        mut rx: mpsc::Receiver<Envelope>,
        delay: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let calls = calls.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let data = request.data.clone().unwrap_or(Value::Null);
                    calls.resolve(Envelope::reply_ok(&request, data));
                });
            }
        })
    }

    #[tokio::test]
    async fn no_client_fails_fast() {
        let calls = CallLayer::new(Arc::new(ConnectionRegistry::new()));
        let started = std::time::Instant::now();
        let result = calls
            .call(Envelope::new("search"), Duration::from_secs(30))
            .await;
        assert_eq!(result, Err(BridgeError::NoClientConnected));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, rx) = mpsc::channel(8);
        registry.register(tx).await;
        spawn_responder(calls.clone(), rx, Duration::ZERO);

        let reply = calls
            .call(
                Envelope::new("echo").with_data(json!({"n": 7})),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply, json!({"n": 7}));
        assert_eq!(calls.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_ids_are_fresh_and_echoed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(tx).await;

        let (seen_tx, mut seen_rx) = mpsc::channel(8);
        let responder = calls.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let id = request.request_id.clone().unwrap();
                seen_tx.send(id.clone()).await.unwrap();
                responder.resolve(Envelope::reply_ok(&request, json!(id)));
            }
        });

        let first = calls
            .call(Envelope::new("echo").with_request_id("stale"), Duration::from_secs(1))
            .await
            .unwrap();
        let second = calls
            .call(Envelope::new("echo"), Duration::from_secs(1))
            .await
            .unwrap();

        let first_id = seen_rx.recv().await.unwrap();
        let second_id = seen_rx.recv().await.unwrap();
        assert_ne!(first_id, "stale");
        assert_ne!(first_id, second_id);
        assert_eq!(first, json!(first_id));
        assert_eq!(second, json!(second_id));
    }

    #[tokio::test]
    async fn late_reply_is_dropped_after_timeout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(tx).await;

        let result = calls
            .call(Envelope::new("echo"), Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(BridgeError::TimedOut(Duration::from_millis(50))));
        assert_eq!(calls.pending_count(), 0);

        let request = rx.recv().await.unwrap();
        assert!(!calls.resolve(Envelope::reply_ok(&request, json!("late"))));
    }

    #[tokio::test]
    async fn slow_call_does_not_stall_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(tx).await;

        // "echo" answers after 2s, everything else immediately.
        let responder = calls.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let responder = responder.clone();
                tokio::spawn(async move {
                    if request.kind == "echo" {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                    responder.resolve(Envelope::reply_ok(&request, json!("pong")));
                });
            }
        });

        let slow = calls
            .call(Envelope::new("echo"), Duration::from_secs(1))
            .await;
        assert_eq!(slow, Err(BridgeError::TimedOut(Duration::from_secs(1))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = std::time::Instant::now();
        let fast = calls
            .call(Envelope::new("ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(fast, json!("pong"));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn unregister_mid_call_is_connection_lost() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let id = registry.register(tx).await;

        let dropper = registry.clone();
        tokio::spawn(async move {
            let _request = rx.recv().await;
            dropper.unregister(&id).await;
        });

        let result = calls
            .call(Envelope::new("list_entities"), Duration::from_secs(5))
            .await;
        assert_eq!(result, Err(BridgeError::ConnectionLost));
        assert_eq!(calls.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_failure_unregisters_and_leaves_nothing_pending() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, rx) = mpsc::channel(8);
        registry.register(tx).await;
        drop(rx);

        let result = calls
            .call(Envelope::new("search"), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(BridgeError::SendFailed(_))));
        assert_eq!(calls.pending_count(), 0);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn full_queue_times_out_instead_of_hanging() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, _rx) = mpsc::channel(1);
        registry.register(tx.clone()).await;
        // Fill the only slot; the writer never drains it.
        tx.send(Envelope::new("ping")).await.unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            calls.call(Envelope::new("search"), Duration::from_millis(100)),
        )
        .await
        .expect("call must honour its own timeout");
        assert_eq!(result, Err(BridgeError::TimedOut(Duration::from_millis(100))));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.pending_count(), 0);
        // Congestion is not a dead connection.
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn unregister_while_queue_full_is_connection_lost() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx.clone()).await;
        tx.send(Envelope::new("ping")).await.unwrap();

        let dropper = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            dropper.unregister(&id).await;
        });

        let result = calls
            .call(Envelope::new("search"), Duration::from_secs(5))
            .await;
        assert_eq!(result, Err(BridgeError::ConnectionLost));
        assert_eq!(calls.pending_count(), 0);
    }

    #[tokio::test]
    async fn huge_timeout_does_not_overflow() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, rx) = mpsc::channel(8);
        registry.register(tx).await;
        spawn_responder(calls.clone(), rx, Duration::ZERO);

        let reply = calls
            .call(Envelope::new("echo").with_data(json!(1)), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(reply, json!(1));
    }

    #[tokio::test]
    async fn application_error_surfaces() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(tx).await;

        let responder = calls.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                responder.resolve(Envelope::reply_err(&request, "not found: Item xyz"));
            }
        });

        let result = calls
            .call(Envelope::new("get_entity"), Duration::from_secs(1))
            .await;
        assert_eq!(
            result,
            Err(BridgeError::Application("not found: Item xyz".into()))
        );
    }

    #[tokio::test]
    async fn abandoned_call_cleans_up() {
        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, _rx) = mpsc::channel(8);
        registry.register(tx).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            calls.call(Envelope::new("echo"), Duration::from_secs(30)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(calls.pending_count(), 0);
    }

    #[tokio::test]
    async fn typed_call_decodes_reply() {
        #[derive(Serialize)]
        struct Query {
            query: &'static str,
        }

        let registry = Arc::new(ConnectionRegistry::new());
        let calls = CallLayer::new(registry.clone());
        let (tx, rx) = mpsc::channel(8);
        registry.register(tx).await;
        spawn_responder(calls.clone(), rx, Duration::ZERO);

        let echoed: HashMap<String, String> = calls
            .call_typed("echo", &Query { query: "sword" }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(echoed["query"], "sword");

        let wrong: Result<Vec<u32>, _> = calls
            .call_typed("echo", &Query { query: "sword" }, Duration::from_secs(1))
            .await;
        assert!(matches!(wrong, Err(BridgeError::Decode(_))));
    }

    #[test]
    fn resolve_without_request_id_is_ignored() {
        let calls = CallLayer::new(Arc::new(ConnectionRegistry::new()));
        assert!(!calls.resolve(Envelope::new("pong")));
    }
}
