//! Unified Logic Hub routes: submit, inspect, approve/deny, and rollback.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use grace_logic_hub::{RiskLevel, SubmitRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::boot::update_type_from_path_segment;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/logic-hub/updates/:segment", post(submit_update).get(get_update))
        .route("/logic-hub/updates", get(list_updates))
        .route("/logic-hub/stats", get(stats))
        .route("/logic-hub/updates/:id/approve", post(approve_update))
        .route("/logic-hub/updates/:id/deny", post(deny_update))
        .route("/logic-hub/updates/:id/rollback", post(rollback_update))
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub component_targets: Vec<String>,
    pub content: Value,
    pub created_by: String,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub update_id: String,
}

async fn submit_update(
    State(state): State<Arc<AppState>>,
    Path(segment): Path<String>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let update_type = update_type_from_path_segment(&segment)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown update type: {segment}")))?;

    let update_id = state
        .hub
        .submit(SubmitRequest {
            update_type,
            component_targets: body.component_targets,
            content: body.content,
            created_by: body.created_by,
            risk_level: body.risk_level,
        })
        .await?;

    Ok(Json(SubmitResponse { update_id }))
}

async fn get_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<grace_logic_hub::LogicUpdate>, ApiError> {
    state
        .hub
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("update not found: {id}")))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_updates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<grace_logic_hub::LogicUpdate>> {
    Json(state.hub.recent(query.limit))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<grace_logic_hub::HubStats> {
    Json(state.hub.stats())
}

async fn approve_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.hub.approve(&id).await?;
    Ok(Json(serde_json::json!({ "update_id": id, "status": "approved" })))
}

#[derive(Debug, Deserialize)]
pub struct DenyBody {
    pub reason: String,
}

async fn deny_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<DenyBody>,
) -> Result<Json<Value>, ApiError> {
    state.hub.deny(&id, &body.reason).await?;
    Ok(Json(serde_json::json!({ "update_id": id, "status": "denied" })))
}

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub rollback_update_id: String,
}

async fn rollback_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RollbackBody>,
) -> Result<Json<RollbackResponse>, ApiError> {
    let rollback_update_id = state.hub.rollback(&id, &body.reason).await?;
    Ok(Json(RollbackResponse { rollback_update_id }))
}
