use axum::{Json, extract::State, http::StatusCode};
use serde_json::Value;
use std::sync::Arc;

use crate::relay::RelayStatus;
use crate::types::{StatsResp, StoredReading};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<dyn RelayStatus>,
}

pub async fn healthz() -> Json<Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResp> {
    Json(state.relay.stats())
}

pub async fn latest(
    State(state): State<AppState>,
) -> Result<Json<StoredReading>, (StatusCode, String)> {
    state
        .relay
        .latest()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "no reading received yet".into()))
}
