//! Mission & Observation Loop and CAPA & Learning Sink routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use grace_missions::{CapaClassification, CapaRecord, Mission, Verdict};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/missions", get(list_missions))
        .route("/missions/:id", get(get_mission))
        .route("/missions/:id/retrospective", get(retrospective))
        .route("/capa", get(list_capa))
        .route("/capa/create", post(create_capa))
        .route("/capa/:id", get(get_capa))
}

#[derive(Debug, Deserialize)]
pub struct MissionQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Filters on the owning `LogicUpdate`'s type — `Mission` itself carries no
    /// type discriminator, so this cross-references `AppState.hub` per mission.
    #[serde(rename = "type")]
    pub update_type: Option<String>,
    pub status: Option<String>,
}

fn default_limit() -> usize {
    50
}

fn verdict_matches_status(mission: &Mission, status: &str) -> bool {
    match mission.verdict {
        None => status.eq_ignore_ascii_case("observing"),
        Some(Verdict::Stable) => status.eq_ignore_ascii_case("stable"),
        Some(Verdict::Acceptable) => status.eq_ignore_ascii_case("acceptable"),
        Some(Verdict::Unstable) => status.eq_ignore_ascii_case("unstable"),
    }
}

async fn list_missions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MissionQuery>,
) -> Json<Vec<Mission>> {
    let mut missions = state.observation.recent(query.limit).await;

    if let Some(update_type) = &query.update_type {
        missions.retain(|m| {
            state
                .hub
                .get(&m.update_id)
                .map(|u| format!("{:?}", u.update_type).eq_ignore_ascii_case(update_type))
                .unwrap_or(false)
        });
    }
    if let Some(status) = &query.status {
        missions.retain(|m| verdict_matches_status(m, status));
    }

    Json(missions)
}

async fn get_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Mission>, ApiError> {
    state
        .observation
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("mission not found: {id}")))
}

async fn retrospective(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mission = state
        .observation
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("mission not found: {id}")))?;
    let retrospective = mission
        .retrospective
        .ok_or_else(|| ApiError::NotFound(format!("no retrospective recorded yet for {id}")))?;
    Ok(Json(serde_json::json!({ "mission_id": id, "retrospective": retrospective })))
}

#[derive(Debug, Deserialize)]
pub struct CapaListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

async fn list_capa(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CapaListQuery>,
) -> Json<Vec<CapaRecord>> {
    Json(state.capa.recent(query.limit))
}

async fn get_capa(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CapaRecord>, ApiError> {
    state
        .capa
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("capa not found: {id}")))
}

#[derive(Debug, Deserialize)]
pub struct CreateCapaBody {
    pub mission_id: String,
    pub update_id: String,
    pub classification: CapaClassification,
    #[serde(default)]
    pub root_cause_tags: Vec<String>,
    #[serde(default)]
    pub planned_actions: Vec<String>,
}

async fn create_capa(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCapaBody>,
) -> Json<CapaRecord> {
    Json(
        state
            .capa
            .create(
                body.mission_id,
                body.update_id,
                body.classification,
                body.root_cause_tags,
                body.planned_actions,
            )
            .await,
    )
}
