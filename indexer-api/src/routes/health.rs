//! Health check endpoint

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::error;

use crate::routes::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// `{"status":"ok"}` iff the store answers
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.storage.ping().map_err(|e| {
        error!("health check failed: {}", e);
        ApiError::internal("store unreachable")
    })?;
    Ok(Json(HealthResponse { status: "ok" }))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
