//! Route definitions for web server.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::api;
use crate::core::dispatcher::Dispatcher;
use crate::relay::Relay;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub relay: Arc<Relay>,
}

/// Create the API router.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        // Dispatcher
        .route("/submit", post(api::submit))
        .route("/agent-response", post(api::agent_response))
        .route("/status", get(api::status))

        // Relay
        .route(
            "/custom-messages",
            get(api::stream_custom_messages).post(api::publish_custom_message),
        )
}

/// Create the full app router.
pub fn create_app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", create_api_router())
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
