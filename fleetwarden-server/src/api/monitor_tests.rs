#![allow(clippy::unwrap_used, reason = "test assertions")]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use fleetwarden_types::models::CircuitState;

use super::accounts::{force_open, queue_message, register_proxy, QueueMessageRequest, RegisterProxyRequest};
use super::monitor::{account_circuit, fleet_summary, healthz, list_proxies, rollup_for_date};
use crate::test_helpers::test_app_state;

#[tokio::test]
async fn test_healthz_reports_instance() {
    let state = test_app_state();
    let Json(body) = healthz(State(state)).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["instance_id"], "test-instance");
}

#[tokio::test]
async fn test_fleet_summary_starts_empty() {
    let state = test_app_state();
    let Json(summary) = fleet_summary(State(state)).await;
    assert_eq!(summary.connected_accounts, 0);
    assert_eq!(summary.total_queue_depth, 0);
    assert_eq!(summary.circuits.open, 0);
    assert!(summary.telemetry_leader.is_none());
}

#[tokio::test]
async fn test_unknown_rollup_is_not_found() {
    let state = test_app_state();
    let result = rollup_for_date(State(state), Path("2024-01-01".to_string())).await;
    assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_circuit_defaults_to_closed() {
    let state = test_app_state();
    let Json(health) = account_circuit(State(state), Path("acc1".to_string())).await;
    assert_eq!(health.state, CircuitState::Closed);
    assert_eq!(health.health_score, 100);
}

#[tokio::test]
async fn test_register_and_list_proxies() {
    let state = test_app_state();
    let response = register_proxy(
        State(state.clone()),
        Json(RegisterProxyRequest {
            proxy_id: "p1".to_string(),
            endpoint: "http://10.0.0.1:8080".to_string(),
            sticky: false,
            enabled: true,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let Json(proxies) = list_proxies(State(state)).await;
    assert_eq!(proxies.len(), 1);
    assert_eq!(proxies[0].proxy_id, "p1");
}

#[tokio::test]
async fn test_bad_proxy_endpoint_is_rejected() {
    let state = test_app_state();
    let response = register_proxy(
        State(state),
        Json(RegisterProxyRequest {
            proxy_id: "p1".to_string(),
            endpoint: "not a proxy".to_string(),
            sticky: false,
            enabled: true,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forced_open_circuit_rejects_sends() {
    let state = test_app_state();
    force_open(State(state.clone()), Path("acc1".to_string())).await;

    let response = queue_message(
        State(state),
        Path("acc1".to_string()),
        Json(QueueMessageRequest {
            recipient: "peer".to_string(),
            payload: "hello".to_string(),
            priority: 0,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
