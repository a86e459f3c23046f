//! Fire-and-forget delivery to every registered connection.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::registry::ConnectionRegistry;

#[derive(Clone, Debug)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send `envelope` to every connection without waiting on any of them.
    ///
    /// Never fails. A connection whose queue is full misses this envelope but
    /// stays registered; one whose channel has closed is pruned. Returns how
    /// many connections accepted the envelope.
    pub async fn broadcast(&self, envelope: Envelope) -> usize {
        let connections = self.registry.all().await;
        if connections.is_empty() {
            debug!(kind = %envelope.kind, "broadcast with no connections");
            return 0;
        }

        let mut delivered = 0;
        for connection in connections {
            match connection.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        conn_id = %connection.id(),
                        kind = %envelope.kind,
                        "outbound queue full, skipping broadcast"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(
                        conn_id = %connection.id(),
                        kind = %envelope.kind,
                        "broadcast send failed, dropping connection"
                    );
                    self.registry.unregister(connection.id()).await;
                }
            }
        }
        debug!(kind = %envelope.kind, delivered, "broadcast sent");
        delivered
    }
}
