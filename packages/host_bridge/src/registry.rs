//! Connection registry: the single owner of every live channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

use crate::envelope::Envelope;
use crate::error::BridgeError;

pub type ConnectionId = String;

/// Handle to one live channel.
///
/// Cloned out of the registry only for the duration of a single send or call.
/// The cancellation token doubles as the liveness flag: it fires when the
/// registry drops the entry.
#[derive(Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Envelope>,
    closed: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_live(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Queue an envelope for the transport's writer task.
    pub(crate) async fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::SendFailed("connection closed".into()));
        }
        self.tx
            .send(envelope)
            .await
            .map_err(|_| BridgeError::SendFailed("channel closed".into()))
    }

    /// Queue an envelope without waiting for room in the queue.
    ///
    /// A cancelled connection reports `Closed` even if its receiver is alive.
    pub(crate) fn try_send(&self, envelope: Envelope) -> Result<(), TrySendError<Envelope>> {
        if self.closed.is_cancelled() {
            return Err(TrySendError::Closed(envelope));
        }
        self.tx.try_send(envelope)
    }

    /// Resolves once the connection has been unregistered.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

/// Diagnostic view of a registered connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

/// Tracks zero or more live channels, in registration order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<Vec<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel and mint its connection id.
    pub async fn register(&self, tx: mpsc::Sender<Envelope>) -> ConnectionId {
        let id = uuid::Uuid::new_v4().to_string();
        let connection = Connection {
            id: id.clone(),
            tx,
            closed: CancellationToken::new(),
            connected_at: Utc::now(),
        };
        let count = {
            let mut connections = self.connections.write().await;
            connections.push(connection);
            connections.len()
        };
        info!(conn_id = %id, count, "connection registered");
        id
    }

    /// Remove a connection. Unknown ids are a no-op.
    ///
    /// Returns whether an entry was removed. Calls waiting on the removed
    /// connection observe its `closed()` future resolving.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            connections
                .iter()
                .position(|c| c.id == id)
                .map(|idx| connections.remove(idx))
        };
        match removed {
            Some(connection) => {
                connection.closed.cancel();
                info!(conn_id = %id, "connection unregistered");
                true
            }
            None => {
                debug!(conn_id = %id, "unregister of unknown connection ignored");
                false
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn all(&self) -> Vec<Connection> {
        self.connections.read().await.clone()
    }

    /// The earliest-registered connection still in the registry.
    pub async fn first(&self) -> Option<Connection> {
        self.connections.read().await.first().cloned()
    }

    pub async fn get(&self, id: &str) -> Option<Connection> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .await
            .iter()
            .map(|c| ConnectionInfo {
                id: c.id.clone(),
                connected_at: c.connected_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_count() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.count().await, 0);
        assert!(registry.first().await.is_none());

        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx).await;
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.all().await[0].id(), id);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let a = registry.register(tx1).await;
        let b = registry.register(tx2).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx).await;

        assert!(registry.unregister(&id).await);
        assert!(!registry.unregister(&id).await);
        assert!(!registry.unregister("never-registered").await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn first_follows_registration_order() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let (tx3, _rx3) = mpsc::channel(1);
        let a = registry.register(tx1).await;
        let b = registry.register(tx2).await;
        let _c = registry.register(tx3).await;

        assert_eq!(registry.first().await.unwrap().id(), a);
        registry.unregister(&a).await;
        assert_eq!(registry.first().await.unwrap().id(), b);
    }

    #[tokio::test]
    async fn unregister_fires_closed() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx).await;
        let conn = registry.get(&id).await.unwrap();
        assert!(conn.is_live());

        registry.unregister(&id).await;
        conn.closed().await;
        assert!(!conn.is_live());
        assert!(conn.send(Envelope::new("ping")).await.is_err());
    }

    #[tokio::test]
    async fn send_to_dropped_receiver_fails() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::channel(1);
        let id = registry.register(tx).await;
        drop(rx);

        let conn = registry.get(&id).await.unwrap();
        assert!(!conn.is_live());
        let err = conn.send(Envelope::new("ping")).await.unwrap_err();
        assert!(matches!(err, BridgeError::SendFailed(_)));
    }

    #[tokio::test]
    async fn try_send_reports_full_and_closed() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx).await;
        let conn = registry.get(&id).await.unwrap();

        assert!(conn.try_send(Envelope::new("ping")).is_ok());
        assert!(matches!(
            conn.try_send(Envelope::new("ping")),
            Err(TrySendError::Full(_))
        ));

        registry.unregister(&id).await;
        assert!(matches!(
            conn.try_send(Envelope::new("ping")),
            Err(TrySendError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_lists_connections() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx).await;
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
    }
}
