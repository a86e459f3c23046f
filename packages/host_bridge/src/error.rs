//! Error types for both ends of the bridge.

use std::time::Duration;

/// Why a correlated call did not produce a result.
///
/// The first four variants are transport-level and may be retried for
/// idempotent calls. The rest are definite answers from the other side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("no client connected")]
    NoClientConnected,

    #[error("failed to send request: {0}")]
    SendFailed(String),

    #[error("no reply within {0:?}")]
    TimedOut(Duration),

    #[error("connection lost before reply")]
    ConnectionLost,

    #[error("remote error: {0}")]
    Application(String),

    #[error("remote has no handler for message type {0:?}")]
    UnknownType(String),

    #[error("malformed payload: {0}")]
    Decode(String),
}

impl BridgeError {
    /// Transport faults that a retry could plausibly fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoClientConnected | Self::SendFailed(_) | Self::TimedOut(_) | Self::ConnectionLost
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoClientConnected => "no_client_connected",
            Self::SendFailed(_) => "send_failed",
            Self::TimedOut(_) => "timed_out",
            Self::ConnectionLost => "connection_lost",
            Self::Application(_) => "application_error",
            Self::UnknownType(_) => "unknown_type",
            Self::Decode(_) => "decode_error",
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Decode(err.to_string())
    }
}

/// Failure reported by a local handler on the dispatcher side.
///
/// The dispatcher stringifies it into the reply's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid payload: {0}")]
    Invalid(String),

    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Invalid(err.to_string())
    }
}
