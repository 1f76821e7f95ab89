//! Mutating operator and connector endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use fleetwarden_core::transport::TransportEvent;
use fleetwarden_types::{ProxyError, SendError};

use crate::state::AppState;

/// Map a send rejection to an HTTP response with a retry hint.
fn send_error_response(err: SendError) -> Response {
    let status = match err {
        SendError::CircuitOpen { .. } | SendError::RateLimited { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        },
        SendError::AccountUnknown { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    let retry_after_ms = err.retry_after_ms();
    (status, Json(json!({ "error": err.to_string(), "retry_after_ms": retry_after_ms })))
        .into_response()
}

#[derive(Deserialize)]
pub struct QueueMessageRequest {
    pub recipient: String,
    pub payload: String,
    #[serde(default)]
    pub priority: i32,
}

pub async fn queue_message(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<QueueMessageRequest>,
) -> Response {
    match state.fleet().queue_send(
        &account_id,
        &request.recipient,
        &request.payload,
        request.priority,
    ) {
        Ok(message_id) => {
            (StatusCode::ACCEPTED, Json(json!({ "message_id": message_id }))).into_response()
        },
        Err(err) => send_error_response(err),
    }
}

/// Transport event callback from the connector. A fresh connection
/// also schedules the account's initial backfill.
pub async fn ingest_event(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(event): Json<TransportEvent>,
) -> StatusCode {
    let fresh_connection = state.fleet().handle_event(&account_id, event);
    if fresh_connection {
        state.backfill().schedule_initial(&account_id);
    }
    StatusCode::NO_CONTENT
}

pub async fn force_open(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> StatusCode {
    state.fleet().breaker().force_open(&account_id, "Operator override");
    StatusCode::NO_CONTENT
}

pub async fn force_close(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> StatusCode {
    state.fleet().breaker().force_close(&account_id, "Operator override");
    StatusCode::NO_CONTENT
}

pub async fn rotate_proxy(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Response {
    match state.fleet().proxies().rotate(&account_id) {
        Ok(proxy_id) => Json(json!({ "proxy_id": proxy_id })).into_response(),
        Err(err) => {
            (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response()
        },
    }
}

#[derive(Deserialize)]
pub struct RegisterProxyRequest {
    pub proxy_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn register_proxy(
    State(state): State<AppState>,
    Json(request): Json<RegisterProxyRequest>,
) -> Response {
    match state.fleet().proxies().register(
        &request.proxy_id,
        &request.endpoint,
        request.sticky,
        request.enabled,
    ) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err @ ProxyError::InvalidEndpoint { .. }) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
        },
        Err(err) => {
            (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response()
        },
    }
}
