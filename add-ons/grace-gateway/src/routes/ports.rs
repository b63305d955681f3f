//! Port Manager & Watchdog routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use grace_core::PortAllocation;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ports/status", axum::routing::get(status))
        .route("/ports/allocations", axum::routing::get(status))
        .route("/ports/allocate", post(allocate))
        .route("/ports/:port/release", post(release))
        .route("/ports/health-check", post(health_check))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Vec<PortAllocation>> {
    Json(state.ports.status())
}

#[derive(Debug, Deserialize)]
pub struct AllocateBody {
    pub service_name: String,
    pub started_by: String,
    pub purpose: String,
    pub pid: u32,
}

async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AllocateBody>,
) -> Result<Json<PortAllocation>, ApiError> {
    Ok(Json(state.ports.allocate(
        &body.service_name,
        &body.started_by,
        &body.purpose,
        body.pid,
    )?))
}

async fn release(
    State(state): State<Arc<AppState>>,
    Path(port): Path<u16>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.ports.release(port)?;
    Ok(Json(serde_json::json!({ "port": port, "status": "released" })))
}

/// Triggers an out-of-cycle watchdog sweep instead of waiting for the next scheduled tick.
async fn health_check(State(state): State<Arc<AppState>>) -> Json<Vec<PortAllocation>> {
    state.ports.sweep_once().await;
    Json(state.ports.status())
}
