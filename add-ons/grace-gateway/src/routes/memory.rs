//! Memory Fusion Gateway routes: gated fetch/store, fetch verification, and
//! audit-trail lookup by session.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use grace_core::{AuditEntry, SignedPayload};
use grace_memory::{FetchRequest, FetchResponse, StoreRequest, StoreResponse, VerifyFetchResponse};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/memory/fetch", post(fetch))
        .route("/memory/store", post(store))
        .route("/memory/verify-fetch", post(verify_fetch))
        .route("/memory/audit-trail/:session_id", get(audit_trail))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, ApiError> {
    Ok(Json(state.memory.fetch(req).await?))
}

async fn store(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StoreRequest>,
) -> Result<Json<StoreResponse>, ApiError> {
    Ok(Json(state.memory.store(req).await?))
}

#[derive(Debug, Deserialize)]
pub struct VerifyFetchBody {
    pub session_id: String,
    pub signature: SignedPayload,
}

async fn verify_fetch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyFetchBody>,
) -> Json<VerifyFetchResponse> {
    Json(state.memory.verify_fetch(&body.session_id, &body.signature).await)
}

async fn audit_trail(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<Vec<AuditEntry>> {
    Json(state.memory.audit_trail(&session_id).await)
}
