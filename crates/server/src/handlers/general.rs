use super::{AppError, AppState};
use axum::{extract::State, Json};
use covidkm::PipelineStore;
use serde_json::{json, Value};

/// The handler for the root (`/`) endpoint.
pub async fn root() -> &'static str {
    "covidkm server is running."
}

/// Liveness: the process is up.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness: the store answers a round trip.
pub async fn readiness_check(State(app_state): State<AppState>) -> Result<Json<Value>, AppError> {
    app_state
        .store
        .ping()
        .await
        .map_err(|e| AppError::Unavailable(format!("store is not ready: {e}")))?;
    Ok(Json(json!({
        "status": "ready",
        "store": app_state.store.name(),
    })))
}
