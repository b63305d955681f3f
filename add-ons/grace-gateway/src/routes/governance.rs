//! Governance Engine routes: inspect and hot-reload the live policy set.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use grace_core::Policy;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/governance/policies", get(policies))
        .route("/governance/policies/reload", post(reload))
}

async fn policies(State(state): State<Arc<AppState>>) -> Json<Vec<Policy>> {
    Json(state.governance.policies())
}

/// Reloads the live policy set directly, bypassing the Hub's `config`-update path used for
/// distributed, audited policy changes — a fast operator path for local testing and recovery.
async fn reload(
    State(state): State<Arc<AppState>>,
    Json(policies): Json<Vec<Policy>>,
) -> Json<serde_json::Value> {
    let count = policies.len();
    state.governance.reload(policies);
    Json(serde_json::json!({ "reloaded": count }))
}
