//! API endpoints for the dispatcher.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::core::queue::QueueStats;
use crate::core::types::{AgentReply, Priority, Role, SubmitOptions};
use crate::error::Error;
use crate::web::router::AppState;

/// Dispatcher failure mapped onto an HTTP status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::TransportNotReady(_) | Error::Initialization(_) | Error::Closed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::ResponseTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::SendFailure(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Queue(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Io(_) | Error::Json(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!("Request failed ({}): {}", status, self.0);
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Submit request.
#[derive(Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub skip_follow_up: bool,
}

fn default_role() -> Role {
    Role::System
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub reply: Option<AgentReply>,
}

/// Queue a prompt and wait for its reply.
pub async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    if payload.prompt.trim().is_empty() {
        return Err(ApiError(Error::Queue("Prompt must not be empty".to_string())));
    }

    let options = SubmitOptions {
        skip_follow_up: payload.skip_follow_up,
        priority: payload.priority,
    };
    let reply = state
        .dispatcher
        .submit(payload.prompt, payload.role, options)
        .await?;

    Ok(Json(SubmitResponse { reply }))
}

/// Inbound reply from a push-connected agent.
#[derive(Deserialize)]
pub struct AgentResponseRequest {
    pub role: Role,
    pub text: String,
}

#[derive(Serialize)]
pub struct AgentResponseAck {
    pub matched: bool,
}

pub async fn agent_response(
    State(state): State<AppState>,
    Json(payload): Json<AgentResponseRequest>,
) -> Json<AgentResponseAck> {
    let matched = state.dispatcher.on_agent_response(payload.role, &payload.text);
    Json(AgentResponseAck { matched })
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub strategy: String,
    pub processing: bool,
    pub queue: QueueStats,
    pub active_conversations: usize,
    pub relay_subscribers: usize,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        strategy: state.dispatcher.strategy_kind().to_string(),
        processing: state.dispatcher.is_processing(),
        queue: state.dispatcher.queue_stats(),
        active_conversations: state.dispatcher.active_conversations(),
        relay_subscribers: state.relay.receiver_count(),
    })
}
