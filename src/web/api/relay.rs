//! API endpoints for custom message fan-out.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::core::types::now_millis;
use crate::web::router::AppState;

#[derive(Deserialize)]
pub struct CustomMessageRequest {
    #[serde(default)]
    pub message: String,
}

/// Broadcast a message to every stream subscriber.
pub async fn publish_custom_message(
    State(state): State<AppState>,
    Json(payload): Json<CustomMessageRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if payload.message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid message" })),
        );
    }

    match state.relay.publish(payload.message) {
        Ok(delivered) => {
            tracing::debug!("Custom message relayed to {} subscribers", delivered);
            (StatusCode::OK, Json(serde_json::json!({ "ok": true })))
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

/// Server-sent event stream of relayed messages, opened with a ping.
pub async fn stream_custom_messages(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let receiver = state
        .relay
        .subscribe()
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    let ping = Event::default()
        .data(serde_json::json!({ "ping": true, "time": now_millis() }).to_string());

    let messages = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(message) => serde_json::to_string(&message)
                .ok()
                .map(|data| Ok(Event::default().data(data))),
            Err(e) => {
                tracing::warn!("Custom message stream lagged: {}", e);
                None
            }
        }
    });

    let events = stream::once(async move { Ok(ping) }).chain(messages);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
