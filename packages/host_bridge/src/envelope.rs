//! The message shape shared by both directions of the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// Server → client, one-way, sent once when a channel opens.
pub const CONNECTED: &str = "connected";
/// Liveness probe. One-way in either direction; also answerable as a call.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
/// Error text a dispatcher replies with when it has no handler for a type.
pub const UNKNOWN_TYPE_ERROR: &str = "unknown message type";

/// A typed, optionally correlated message.
///
/// `request_id` is `None` for one-way notifications. A reply carries the
/// `request_id` of the request it answers and either `data` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request_id: None,
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Successful reply to `request`.
    pub fn reply_ok(request: &Envelope, data: Value) -> Self {
        Self {
            kind: request.kind.clone(),
            request_id: request.request_id.clone(),
            data: Some(data),
            error: None,
        }
    }

    /// Failed reply to `request`.
    pub fn reply_err(request: &Envelope, error: impl Into<String>) -> Self {
        Self {
            kind: request.kind.clone(),
            request_id: request.request_id.clone(),
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.request_id.is_none()
    }

    /// Interpret this envelope as the reply to a call.
    pub fn into_reply_result(self) -> Result<Value, BridgeError> {
        match self.error {
            Some(error) if error == UNKNOWN_TYPE_ERROR => Err(BridgeError::UnknownType(self.kind)),
            Some(error) => Err(BridgeError::Application(error)),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
