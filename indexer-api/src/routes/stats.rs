//! Operational stats endpoint

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use indexer_services::PerfSnapshot;

use crate::AppState;

/// Performance counters snapshot
async fn stats(State(state): State<AppState>) -> Json<PerfSnapshot> {
    Json(state.perf.snapshot())
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}
