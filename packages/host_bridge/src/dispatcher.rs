//! Client-side dispatcher: routes inbound envelopes to local handlers.
//!
//! Handlers are registered by type tag before the channel opens. Correlated
//! requests always get a reply (result, handler failure, or
//! [`UNKNOWN_TYPE_ERROR`]); one-way notifications never do, except that a
//! one-way `ping` is answered with a one-way `pong`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::{Envelope, PING, PONG, UNKNOWN_TYPE_ERROR};
use crate::error::HandlerError;

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

#[derive(Clone)]
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// A dispatcher that already answers correlated `ping` with `"pong"`.
    pub fn new() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
        };
        dispatcher.register(PING, |_| async { Ok(Value::from(PONG)) });
        dispatcher
    }

    /// Register a raw handler for `kind`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.insert(kind.into(), handler);
    }

    /// Register a handler with typed request and response payloads.
    ///
    /// A missing payload is read as JSON `null`, so `()` and `Option<_>`
    /// requests accept notifications without data.
    pub fn on<Req, Resp, F, Fut>(&mut self, kind: impl Into<String>, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(kind, move |payload| {
            let handler = handler.clone();
            async move {
                let request: Req = serde_json::from_value(payload)?;
                let response = handler(request).await?;
                Ok(serde_json::to_value(response)?)
            }
        });
    }

    /// Run the handler for `envelope` and build the reply, if one is owed.
    pub async fn dispatch(&self, envelope: Envelope) -> Option<Envelope> {
        let handler = self.handlers.get(&envelope.kind).cloned();

        if envelope.is_notification() {
            if envelope.kind == PING {
                return Some(Envelope::new(PONG));
            }
            match handler {
                Some(handler) => {
                    let payload = envelope.data.unwrap_or(Value::Null);
                    if let Err(e) = handler(payload).await {
                        warn!(kind = %envelope.kind, error = %e, "notification handler failed");
                    }
                }
                None => debug!(kind = %envelope.kind, "no handler for notification"),
            }
            return None;
        }

        let Some(handler) = handler else {
            warn!(kind = %envelope.kind, "request for unknown message type");
            return Some(Envelope::reply_err(&envelope, UNKNOWN_TYPE_ERROR));
        };

        let payload = envelope.data.clone().unwrap_or(Value::Null);
        let reply = match handler(payload).await {
            Ok(data) => Envelope::reply_ok(&envelope, data),
            Err(e) => {
                debug!(kind = %envelope.kind, error = %e, "handler returned error");
                Envelope::reply_err(&envelope, e.to_string())
            }
        };
        Some(reply)
    }
}
