//! Audit Log routes: paginated read access and on-demand chain verification.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use grace_core::{AuditEntry, IntegrityReport};
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/audit", get(list))
        .route("/audit/verify", get(verify))
        .route("/audit/:resource", get(by_resource))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub start: u64,
    pub end: Option<u64>,
}

async fn list(State(state): State<Arc<AppState>>, Query(query): Query<AuditQuery>) -> Json<Vec<AuditEntry>> {
    Json(state.audit.get(query.start, query.end).await)
}

async fn by_resource(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
) -> Json<Vec<AuditEntry>> {
    Json(state.audit.by_resource(&resource).await)
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub from_sequence: Option<u64>,
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<IntegrityReport>, crate::error::ApiError> {
    let report = state
        .audit
        .verify_integrity(query.from_sequence)
        .await
        .map_err(crate::error::ApiError::Grace)?;
    Ok(Json(report))
}
