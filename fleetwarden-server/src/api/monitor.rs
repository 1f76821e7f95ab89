//! Read-only operator queries.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use serde_json::{json, Value};

use fleetwarden_types::models::{CircuitHealth, HealthSnapshot, ProxySnapshot, Rollup};

use crate::state::AppState;

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "instance_id": state.inner.instance_id,
        "started_at_ms": state.inner.started_at_ms,
    }))
}

#[derive(Serialize)]
pub struct FleetSummary {
    pub circuits: fleetwarden_core::breaker::CircuitSummary,
    pub tracked_accounts: usize,
    pub connected_accounts: usize,
    pub high_risk_accounts: usize,
    pub total_queue_depth: usize,
    pub active_backfills: usize,
    pub telemetry_leader: Option<String>,
}

pub async fn fleet_summary(State(state): State<AppState>) -> Json<FleetSummary> {
    let fleet = state.fleet();
    Json(FleetSummary {
        circuits: fleet.breaker().summary(),
        tracked_accounts: fleet.monitor().tracked_accounts(),
        connected_accounts: fleet.connected_account_ids().len(),
        high_risk_accounts: fleet
            .monitor()
            .count_at_risk(fleetwarden_types::models::RiskLevel::High),
        total_queue_depth: fleet.limiter().total_queue_depth(),
        active_backfills: state.backfill().active_runs(),
        telemetry_leader: state
            .telemetry()
            .current_leader()
            .await
            .map(|doc| doc.holder_instance_id),
    })
}

pub async fn account_health(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<HealthSnapshot>, StatusCode> {
    state.fleet().health_snapshot(&account_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn account_circuit(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Json<CircuitHealth> {
    Json(state.fleet().circuit_health(&account_id))
}

pub async fn account_queue(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<fleetwarden_core::limiter::QueueStatus>, StatusCode> {
    state.fleet().limiter().queue_status(&account_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn list_proxies(State(state): State<AppState>) -> Json<Vec<ProxySnapshot>> {
    Json(state.fleet().proxies().snapshots())
}

pub async fn rollup_for_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Rollup>, StatusCode> {
    state.telemetry().rollup_for(&date).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}
