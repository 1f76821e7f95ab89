//! Operator REST API.

mod accounts;
mod monitor;

#[cfg(test)]
mod monitor_tests;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/healthz", get(monitor::healthz))
        .route("/api/fleet/summary", get(monitor::fleet_summary))
        .route("/api/rollups/:date", get(monitor::rollup_for_date))
        .route("/api/proxies", get(monitor::list_proxies).post(accounts::register_proxy))
        .route("/api/accounts/:id/health", get(monitor::account_health))
        .route("/api/accounts/:id/circuit", get(monitor::account_circuit))
        .route("/api/accounts/:id/circuit/force-open", post(accounts::force_open))
        .route("/api/accounts/:id/circuit/force-close", post(accounts::force_close))
        .route("/api/accounts/:id/queue", get(monitor::account_queue))
        .route("/api/accounts/:id/messages", post(accounts::queue_message))
        .route("/api/accounts/:id/events", post(accounts::ingest_event))
        .route("/api/accounts/:id/proxy/rotate", post(accounts::rotate_proxy))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
