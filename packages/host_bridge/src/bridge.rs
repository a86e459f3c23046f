//! The backend-facing handle that ties registry, broadcaster and calls together.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broadcast::Broadcaster;
use crate::calls::CallLayer;
use crate::envelope::Envelope;
use crate::error::BridgeError;
use crate::registry::ConnectionRegistry;

/// Cheap to clone; all clones share one registry and one pending map.
#[derive(Clone)]
pub struct Bridge {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    calls: CallLayer,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: Broadcaster::new(registry.clone()),
            calls: CallLayer::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn broadcast(&self, envelope: Envelope) -> usize {
        self.broadcaster.broadcast(envelope).await
    }

    pub async fn call(&self, request: Envelope, timeout: Duration) -> Result<Value, BridgeError> {
        self.calls.call(request, timeout).await
    }

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
        self.calls.call_typed(kind, request, timeout).await
    }

    pub fn resolve(&self, reply: Envelope) -> bool {
        self.calls.resolve(reply)
    }

    pub fn pending_count(&self) -> usize {
        self.calls.pending_count()
    }
}
