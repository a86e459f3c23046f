//! Backend half of the host bridge.
//!
//! Embedded clients dial `/ws`; everything under `/api` turns an HTTP request
//! into a correlated call against the first connected client.

pub mod config;
pub mod handlers;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use host_bridge::Bridge;
use host_bridge::content::ContentApi;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};

use crate::config::{CallConfig, ServerConfig};

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    pub content: ContentApi,
    pub server_config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(server_config: ServerConfig, call_config: CallConfig) -> Self {
        let bridge = Bridge::new();
        let content = ContentApi::new(bridge.clone(), call_config.timeout, call_config.retry);
        Self {
            bridge,
            content,
            server_config: Arc::new(server_config),
        }
    }
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(handlers::health_handler))
        .route("/api/search", get(handlers::search_handler))
        .route(
            "/api/entities",
            get(handlers::list_entities_handler).post(handlers::create_entity_handler),
        )
        .route(
            "/api/entities/{entity_type}/{id}",
            get(handlers::get_entity_handler).delete(handlers::delete_entity_handler),
        )
        .route(
            "/api/entities/{entity_type}/{id}/items",
            post(handlers::attach_items_handler),
        )
        .route("/api/files", get(handlers::list_files_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
