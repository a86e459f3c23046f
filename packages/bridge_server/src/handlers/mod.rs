mod content;
mod health;

pub use content::*;
pub use health::*;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use host_bridge::BridgeError;

/// A bridge failure rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BridgeError::NoClientConnected | BridgeError::ConnectionLost => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BridgeError::SendFailed(_) | BridgeError::Decode(_) => StatusCode::BAD_GATEWAY,
            BridgeError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::UnknownType(_) => StatusCode::NOT_IMPLEMENTED,
            BridgeError::Application(msg) if msg.contains("not found") => StatusCode::NOT_FOUND,
            BridgeError::Application(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({
                "error": self.0.error_code(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}
