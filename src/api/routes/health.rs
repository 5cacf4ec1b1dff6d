//! Health Routes
//!
//! - GET /health - Plain-text banner, kept for existing monitors
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (store answers)
//! - GET /health/stats - Hub counters

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::{ReadyResponse, StatsResponse};
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// GET /health
pub async fn banner() -> &'static str {
    "Server is running!"
}

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 once the store can serve a read, 503 otherwise.
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<Json<ReadyResponse>> {
    state.store.recent_messages(1).await?;

    Ok(Json(ReadyResponse {
        status: "ok".to_string(),
        storage: state.store.backend().to_string(),
    }))
}

/// GET /health/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        hub: state.hub.stats().await,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
